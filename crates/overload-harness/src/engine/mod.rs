pub mod coordinator;
pub mod handle;
pub mod pool;
pub mod publisher;
pub mod subscriber;
pub mod topics;

use crate::error::DriverError;
use crate::transport::Connector;
use async_trait::async_trait;
use handle::ConnectionHandle;
use pool::Pool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A role the coordinator can run over a pool of handles.
#[async_trait]
pub trait Driver<C: Connector>: Send + Sync + 'static {
    /// Brings one handle from `Disconnected` to the driver's ready state.
    /// Called once per handle, in pool order, before [`Driver::run`].
    async fn attach(
        &self,
        handle: &Arc<ConnectionHandle<C>>,
        cancel: &CancellationToken,
    ) -> Result<(), DriverError>;

    /// Steady-state work. Returns when `cancel` fires or on the first error.
    async fn run(&self, pool: &Pool<C>, cancel: &CancellationToken) -> Result<(), DriverError>;

    /// Best-effort teardown before the handle is closed.
    async fn detach(&self, _handle: &Arc<ConnectionHandle<C>>, _cancel: &CancellationToken) {}
}
