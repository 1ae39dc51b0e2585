use crate::codec::{Payload, PayloadCodec};
use crate::engine::handle::{ConnectionHandle, MessageCallback};
use crate::engine::pool::Pool;
use crate::engine::topics::{subscription_filter, topic_path, TopicSet};
use crate::engine::Driver;
use crate::error::DriverError;
use crate::metrics::Metrics;
use crate::transport::{ClientOptions, Connector, InboundMessage, TIMESTAMP_PROPERTY};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use overload_common::{Config, QosLevel, SubscriberConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Setup progress of one subscribing handle. `Active` is terminal until
/// shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberPhase {
    Idle,
    Connecting,
    Subscribing,
    Active,
}

/// Connects each handle once, subscribes it to every filter in the shared
/// group and logs each decoded delivery.
pub struct SubscriberDriver {
    filters: Vec<String>,
    qos: QosLevel,
    unsubscribe_on_shutdown: bool,
    codec: Arc<PayloadCodec>,
    metrics: Arc<Metrics>,
    processed: Arc<AtomicU64>,
    phases: DashMap<String, SubscriberPhase>,
    started: Instant,
}

impl SubscriberDriver {
    pub fn new(config: &SubscriberConfig, codec: Arc<PayloadCodec>, metrics: Arc<Metrics>) -> Self {
        let filters = TopicSet::sequential(config.topic_count, config.topic_width)
            .suffixes()
            .iter()
            .map(|suffix| {
                subscription_filter(&config.share_group, &topic_path(&config.topic_prefix, suffix))
            })
            .collect();

        Self {
            filters,
            qos: config.qos,
            unsubscribe_on_shutdown: config.unsubscribe_on_shutdown,
            codec,
            metrics,
            processed: Arc::new(AtomicU64::new(0)),
            phases: DashMap::new(),
            started: Instant::now(),
        }
    }

    /// One `ClientOptions` per subscribing client, ids `<client_id>_ce_<i>`.
    pub fn client_options(config: &Config) -> Vec<ClientOptions> {
        (0..config.subscriber.clients)
            .map(|i| {
                let id = format!("{}_ce_{}", config.subscriber.client_id, i);
                ClientOptions::from_broker(&config.broker, id)
            })
            .collect()
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Messages decoded so far across every handle of this driver.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn phase(&self, client_id: &str) -> SubscriberPhase {
        self.phases
            .get(client_id)
            .map(|entry| *entry.value())
            .unwrap_or(SubscriberPhase::Idle)
    }

    fn set_phase(&self, client_id: &str, phase: SubscriberPhase) {
        self.phases.insert(client_id.to_string(), phase);
    }

    pub fn message_callback(&self, client_id: &str) -> MessageCallback {
        let codec = Arc::clone(&self.codec);
        let metrics = Arc::clone(&self.metrics);
        let processed = Arc::clone(&self.processed);
        let client_id = client_id.to_string();

        Arc::new(move |message: InboundMessage| {
            let received_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            match codec.decode::<Payload>(&message.payload) {
                Ok(payload) => {
                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    metrics.received.inc();
                    let sent_ms = message
                        .user_properties
                        .iter()
                        .find(|(key, _)| key == TIMESTAMP_PROPERTY)
                        .map(|(_, value)| value.as_str())
                        .unwrap_or("-");
                    info!(
                        client_id = %client_id,
                        processed = count,
                        topic = %message.topic,
                        packet_id = ?message.packet_id,
                        suffix = %payload.x,
                        timestamp = %payload.value,
                        sent_ms = %sent_ms,
                        received_at = %received_at,
                        "Message received"
                    );
                }
                Err(e) => {
                    metrics.decode_failures.inc();
                    warn!(
                        client_id = %client_id,
                        topic = %message.topic,
                        packet_id = ?message.packet_id,
                        error = %e,
                        "Dropping message that failed to decode"
                    );
                }
            }
        })
    }
}

#[async_trait]
impl<C: Connector> Driver<C> for SubscriberDriver {
    async fn attach(
        &self,
        handle: &Arc<ConnectionHandle<C>>,
        cancel: &CancellationToken,
    ) -> Result<(), DriverError> {
        let client_id = handle.client_id();

        self.set_phase(client_id, SubscriberPhase::Connecting);
        handle
            .connect(Some(self.message_callback(client_id)), cancel)
            .await
            .map_err(|source| DriverError::Connect {
                client_id: client_id.to_string(),
                source,
            })?;

        self.set_phase(client_id, SubscriberPhase::Subscribing);
        for filter in &self.filters {
            handle
                .subscribe(filter, self.qos, cancel)
                .await
                .map_err(|source| DriverError::Subscribe {
                    client_id: client_id.to_string(),
                    filter: filter.clone(),
                    source,
                })?;
            info!(
                client_id = %client_id,
                filter = %filter,
                elapsed = ?self.started.elapsed(),
                "Subscribed"
            );
        }

        self.set_phase(client_id, SubscriberPhase::Active);
        info!(
            client_id = %client_id,
            filters = self.filters.len(),
            elapsed = ?self.started.elapsed(),
            "Subscriber ready"
        );
        Ok(())
    }

    async fn run(&self, pool: &Pool<C>, cancel: &CancellationToken) -> Result<(), DriverError> {
        info!(clients = pool.len(), filters = self.filters.len(), "Subscriber listening");
        cancel.cancelled().await;
        info!(processed = self.processed(), "Subscriber stopped");
        Ok(())
    }

    async fn detach(&self, handle: &Arc<ConnectionHandle<C>>, cancel: &CancellationToken) {
        if !self.unsubscribe_on_shutdown || !handle.is_connected() {
            return;
        }
        for filter in &self.filters {
            if let Err(e) = handle.unsubscribe(filter, cancel).await {
                warn!(
                    client_id = %handle.client_id(),
                    filter = %filter,
                    error = %e,
                    "Unsubscribe failed"
                );
            }
        }
    }
}
