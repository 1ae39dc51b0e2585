use crate::engine::handle::{ConnectionHandle, ConnectionState};
use crate::error::HandleFailure;
use crate::transport::{ClientOptions, Connector};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Fixed-size set of connection handles sharing one connector. Reconnect
/// failures from any handle are funnelled into a single channel.
pub struct Pool<C: Connector> {
    handles: Vec<Arc<ConnectionHandle<C>>>,
    failures: Mutex<mpsc::UnboundedReceiver<HandleFailure>>,
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: Arc<C>, options: impl IntoIterator<Item = ClientOptions>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handles = options
            .into_iter()
            .map(|opts| Arc::new(ConnectionHandle::new(opts, Arc::clone(&connector), tx.clone())))
            .collect();

        Self {
            handles,
            failures: Mutex::new(rx),
        }
    }

    pub fn handles(&self) -> &[Arc<ConnectionHandle<C>>] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn count_in(&self, state: ConnectionState) -> usize {
        self.handles.iter().filter(|h| h.state() == state).count()
    }

    /// Waits for the next handle that lost its connection for good.
    ///
    /// Returns `None` only once every handle has been dropped.
    pub async fn next_failure(&self) -> Option<HandleFailure> {
        self.failures.lock().await.recv().await
    }
}
