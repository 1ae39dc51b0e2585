//! The MQTT client capability the engine drives.
//!
//! A [`Connector`] opens a session and splits it into a [`Session`] (the
//! command half, cheap to clone) and an [`EventStream`] (the inbound half,
//! owned by exactly one task). Protocol framing, QoS handshakes and keep-alive
//! all live behind these traits.

pub mod message;
pub mod rumqtt;

use crate::error::{CloseError, ConnectError, PublishError, SubscribeError};
use async_trait::async_trait;
use overload_common::{BrokerConfig, QosLevel};
use std::time::Duration;

pub use message::{InboundMessage, OutboundMessage, CONTENT_TYPE_JSON, TIMESTAMP_PROPERTY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Fully-specified settings for one broker connection.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub websocket_path: Option<String>,
    pub credentials: Option<Credentials>,
    pub qos: QosLevel,
    pub persistent_session: bool,
    pub session_expiry: Duration,
    pub keep_alive: Duration,
    pub request_capacity: usize,
}

impl ClientOptions {
    pub fn from_broker(broker: &BrokerConfig, client_id: impl Into<String>) -> Self {
        let credentials = match (&broker.username, &broker.password) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.trim().is_empty() => {
                Some(Credentials {
                    username: user.clone(),
                    password: pass.clone(),
                })
            }
            _ => None,
        };

        let websocket_path = broker
            .websocket_path
            .as_ref()
            .filter(|path| !path.trim().is_empty())
            .cloned();

        Self {
            client_id: client_id.into(),
            host: broker.host.clone(),
            port: broker.port,
            websocket_path,
            credentials,
            qos: broker.qos,
            persistent_session: broker.persistent_session,
            session_expiry: Duration::from_secs(broker.session_expiry_secs),
            keep_alive: Duration::from_secs(broker.keep_alive_secs),
            request_capacity: broker.request_capacity.max(1),
        }
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Something the event stream observed on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Message(InboundMessage),
    /// The transport went away; carries the underlying reason.
    Dropped(String),
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;
    type Events: EventStream;

    /// Opens a transport, performs the CONNECT handshake and returns once the
    /// broker has accepted the connection.
    async fn connect(
        &self,
        options: &ClientOptions,
    ) -> Result<(Self::Session, Self::Events), ConnectError>;
}

#[async_trait]
pub trait Session: Clone + Send + Sync + 'static {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;

    async fn subscribe(&self, filter: &str, qos: QosLevel) -> Result<(), SubscribeError>;

    async fn unsubscribe(&self, filter: &str) -> Result<(), SubscribeError>;

    async fn disconnect(&self) -> Result<(), CloseError>;
}

#[async_trait]
pub trait EventStream: Send + 'static {
    async fn next_event(&mut self) -> SessionEvent;

    /// Makes one attempt to re-establish the dropped transport.
    async fn reconnect(&mut self) -> Result<(), ConnectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_need_both_halves() {
        let mut broker = BrokerConfig {
            username: Some("admin".into()),
            password: None,
            ..Default::default()
        };
        assert!(ClientOptions::from_broker(&broker, "c").credentials.is_none());

        broker.password = Some("  ".into());
        assert!(ClientOptions::from_broker(&broker, "c").credentials.is_none());

        broker.password = Some("hivemq".into());
        let creds = ClientOptions::from_broker(&broker, "c").credentials.unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "hivemq");
    }

    #[test]
    fn blank_websocket_path_selects_tcp() {
        let broker = BrokerConfig {
            websocket_path: Some(" ".into()),
            ..Default::default()
        };
        let options = ClientOptions::from_broker(&broker, "c");
        assert!(options.websocket_path.is_none());
        assert_eq!(options.broker_addr(), "localhost:1883");
    }

    #[test]
    fn session_expiry_comes_from_seconds() {
        let options = ClientOptions::from_broker(&BrokerConfig::default(), "c");
        assert_eq!(options.session_expiry, Duration::from_secs(432_000));
        assert!(options.persistent_session);
    }
}
