//! Startup, steady state and shutdown for one role.
//!
//! Startup connects every handle in pool order and aborts on the first
//! failure; there is no degraded partial pool. The steady state runs the
//! driver until it fails, a handle is lost or shutdown is requested.
//! Shutdown closes every handle concurrently and waits for all of them.

use crate::engine::handle::{CloseOptions, ConnectionState};
use crate::engine::pool::Pool;
use crate::engine::Driver;
use crate::error::DriverError;
use crate::metrics::Metrics;
use crate::transport::Connector;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Coordinator<C: Connector, D: Driver<C>> {
    pool: Arc<Pool<C>>,
    driver: Arc<D>,
    close_options: CloseOptions,
    metrics: Arc<Metrics>,
    _connector: PhantomData<fn() -> C>,
}

impl<C: Connector, D: Driver<C>> Coordinator<C, D> {
    pub fn new(
        pool: Pool<C>,
        driver: Arc<D>,
        close_options: CloseOptions,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool: Arc::new(pool),
            driver,
            close_options,
            metrics,
            _connector: PhantomData,
        }
    }

    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Runs the full lifecycle until `shutdown` fires or something fails.
    /// Cancellation at any point is a clean exit.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<(), DriverError> {
        if let Err(e) = self.start(shutdown).await {
            self.shutdown().await;
            return if e.is_cancelled() { Ok(()) } else { Err(e) };
        }

        let work = shutdown.child_token();
        let outcome = tokio::select! {
            res = self.driver.run(&self.pool, &work) => res,
            Some(failure) = self.pool.next_failure() => {
                self.metrics.handle_failures.inc();
                error!(
                    client_id = %failure.client_id,
                    broker = %failure.broker,
                    error = %failure.reason,
                    "Client lost, stopping"
                );
                Err(DriverError::HandleLost(failure))
            }
            _ = shutdown.cancelled() => Ok(()),
        };
        work.cancel();

        if shutdown.is_cancelled() {
            info!("Shutdown signal received");
        }
        self.shutdown().await;

        match outcome {
            Err(e) if e.is_cancelled() => Ok(()),
            other => other,
        }
    }

    /// Attaches every handle, one at a time.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), DriverError> {
        info!(clients = self.pool.len(), "Starting clients");

        for handle in self.pool.handles() {
            if let Err(e) = self.driver.attach(handle, cancel).await {
                if !e.is_cancelled() {
                    error!(
                        client_id = %handle.client_id(),
                        broker = %handle.options().broker_addr(),
                        error = %e,
                        "Startup failed"
                    );
                }
                return Err(e);
            }
        }

        let connected = self.pool.count_in(ConnectionState::Connected);
        self.metrics.connected_clients.set(connected as i64);
        info!(connected = connected, "All clients started");
        Ok(())
    }

    /// Detaches and closes every handle concurrently. Failures are logged
    /// per handle and never stop the others.
    pub async fn shutdown(&self) {
        let mut tasks = JoinSet::new();

        for handle in self.pool.handles() {
            let handle = Arc::clone(handle);
            let driver = Arc::clone(&self.driver);
            let options = self.close_options;

            tasks.spawn(async move {
                let cancel = CancellationToken::new();
                if tokio::time::timeout(options.timeout, driver.detach(&handle, &cancel))
                    .await
                    .is_err()
                {
                    warn!(client_id = %handle.client_id(), "Detach timed out");
                }
                if let Err(e) = handle.close(&options, &cancel).await {
                    warn!(client_id = %handle.client_id(), error = %e, "Close failed");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Close task failed");
            }
        }

        self.metrics
            .connected_clients
            .set(self.pool.count_in(ConnectionState::Connected) as i64);
        info!(clients = self.pool.len(), "All clients closed");
    }
}
