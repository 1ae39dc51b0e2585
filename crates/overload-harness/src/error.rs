use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The broker answered CONNECT with a non-success reason code.
    #[error("server denied connection with reason '{reason}'")]
    Refused { reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection attempt already in progress")]
    InProgress,
    #[error("handle is closed")]
    Closed,
    #[error("connect cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("client is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("publish cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("client is not connected")]
    NotConnected,
    #[error("subscription to '{filter}' rejected: {reason}")]
    Rejected { filter: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("subscribe cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("event loop did not stop within {0:?}")]
    Timeout(Duration),
    #[error("close cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
}

/// A handle lost its transport and the single reconnect attempt failed.
#[derive(Debug, Clone, Error)]
#[error("client {client_id} unable to reconnect to {broker}: {reason}")]
pub struct HandleFailure {
    pub client_id: String,
    pub broker: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("client {client_id} failed to connect: {source}")]
    Connect {
        client_id: String,
        #[source]
        source: ConnectError,
    },
    #[error("client {client_id} failed to publish to {topic} on {broker}: {source}")]
    Publish {
        client_id: String,
        broker: String,
        topic: String,
        #[source]
        source: PublishError,
    },
    #[error("client {client_id} failed to subscribe to {filter}: {source}")]
    Subscribe {
        client_id: String,
        filter: String,
        #[source]
        source: SubscribeError,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    HandleLost(#[from] HandleFailure),
    #[error("publish task failed: {0}")]
    Task(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl DriverError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DriverError::Cancelled
                | DriverError::Connect {
                    source: ConnectError::Cancelled,
                    ..
                }
                | DriverError::Publish {
                    source: PublishError::Cancelled,
                    ..
                }
                | DriverError::Subscribe {
                    source: SubscribeError::Cancelled,
                    ..
                }
        )
    }
}
