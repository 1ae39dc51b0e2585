//! Sustained publish load over a pool of handles.
//!
//! Topic suffixes are split into fixed-size batches. For every batch one
//! record per suffix is encoded, then every handle publishes every record
//! concurrently. The next batch starts only once the whole cross-product has
//! finished. Any failed publish ends the run.

use crate::codec::{Payload, PayloadCodec};
use crate::engine::handle::ConnectionHandle;
use crate::engine::pool::Pool;
use crate::engine::topics::{topic_path, TopicSet};
use crate::engine::Driver;
use crate::error::DriverError;
use crate::metrics::Metrics;
use crate::transport::{ClientOptions, Connector};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use overload_common::{Config, PublisherConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct PublisherDriver {
    topics: TopicSet,
    topic_prefix: String,
    batch_size: usize,
    retain: bool,
    codec: Arc<PayloadCodec>,
    metrics: Arc<Metrics>,
    published: AtomicU64,
    passes: AtomicU64,
    started: Instant,
}

impl PublisherDriver {
    pub fn new(config: &PublisherConfig, codec: Arc<PayloadCodec>, metrics: Arc<Metrics>) -> Self {
        Self {
            topics: TopicSet::sequential(config.topic_count, config.topic_width),
            topic_prefix: config.topic_prefix.clone(),
            batch_size: config.batch_size,
            retain: config.retain,
            codec,
            metrics,
            published: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// One `ClientOptions` per publishing client, ids `<prefix><uuid>`.
    pub fn client_options(config: &Config) -> Vec<ClientOptions> {
        (0..config.publisher.clients)
            .map(|_| {
                let id = format!("{}{}", config.publisher.client_id_prefix, Uuid::new_v4());
                ClientOptions::from_broker(&config.broker, id)
            })
            .collect()
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Publishes every batch once. Returns the number of messages published.
    pub async fn publish_pass<C: Connector>(
        &self,
        pool: &Pool<C>,
        cancel: &CancellationToken,
    ) -> Result<u64, DriverError> {
        let mut sent = 0;
        for batch in self.topics.batches(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(DriverError::Cancelled);
            }
            sent += self.publish_batch(pool, batch, cancel).await?;
        }

        self.passes.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    async fn publish_batch<C: Connector>(
        &self,
        pool: &Pool<C>,
        suffixes: &[String],
        cancel: &CancellationToken,
    ) -> Result<u64, DriverError> {
        let mut records: Vec<(String, Bytes)> = Vec::with_capacity(suffixes.len());
        for suffix in suffixes {
            let payload = self.codec.encode(&Payload::stamped(suffix.as_str()))?;
            records.push((topic_path(&self.topic_prefix, suffix), payload));
        }

        let mut tasks = JoinSet::new();
        for handle in pool.handles() {
            for (topic, payload) in &records {
                tasks.spawn(publish_one(
                    Arc::clone(handle),
                    topic.clone(),
                    payload.clone(),
                    self.retain,
                    cancel.clone(),
                ));
            }
        }

        let mut sent = 0;
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| DriverError::Task(e.to_string()));
            match outcome.and_then(|res| res) {
                Ok(()) => {
                    sent += 1;
                    self.published.fetch_add(1, Ordering::Relaxed);
                    self.metrics.published.inc();
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }
}

async fn publish_one<C: Connector>(
    handle: Arc<ConnectionHandle<C>>,
    topic: String,
    payload: Bytes,
    retain: bool,
    cancel: CancellationToken,
) -> Result<(), DriverError> {
    handle
        .publish(payload, &topic, retain, &cancel)
        .await
        .map(|_| ())
        .map_err(|source| DriverError::Publish {
            client_id: handle.client_id().to_string(),
            broker: handle.options().broker_addr(),
            topic,
            source,
        })
}

#[async_trait]
impl<C: Connector> Driver<C> for PublisherDriver {
    async fn attach(
        &self,
        handle: &Arc<ConnectionHandle<C>>,
        cancel: &CancellationToken,
    ) -> Result<(), DriverError> {
        handle
            .connect(None, cancel)
            .await
            .map_err(|source| DriverError::Connect {
                client_id: handle.client_id().to_string(),
                source,
            })
    }

    async fn run(&self, pool: &Pool<C>, cancel: &CancellationToken) -> Result<(), DriverError> {
        info!(
            clients = pool.len(),
            topics = self.topics.len(),
            batch_size = self.batch_size,
            "Publisher started"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.publish_pass(pool, cancel).await {
                Ok(sent) => {
                    debug!(sent = sent, "Publish pass complete");
                    info!(
                        published = self.published(),
                        elapsed = ?self.started.elapsed(),
                        now = %Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                        "Published messages"
                    );
                }
                Err(e) if e.is_cancelled() => {
                    info!(published = self.published(), "Publisher stopped");
                    return Ok(());
                }
                Err(e) => {
                    match &e {
                        DriverError::Publish {
                            client_id, broker, ..
                        } => error!(
                            client_id = %client_id,
                            broker = %broker,
                            error = %e,
                            published = self.published(),
                            "Publish failed, stopping publisher"
                        ),
                        _ => error!(
                            error = %e,
                            published = self.published(),
                            "Publish failed, stopping publisher"
                        ),
                    }
                    return Err(e);
                }
            }
        }
    }
}
