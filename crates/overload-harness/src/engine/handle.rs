//! One broker connection and its lifecycle.
//!
//! State and session live behind a single per-handle lock, so a publish either
//! sees `Connected` together with a live session or fails with
//! [`PublishError::NotConnected`]. State changes are mirrored into a watch
//! channel for observers.
//!
//! An unexpected transport drop triggers exactly one reconnect attempt from
//! the event pump. If that attempt fails the handle becomes `Disconnected` and
//! a [`HandleFailure`] is sent to the owner. A deliberate [`close`] moves the
//! handle to `Closed` first, which disarms the reconnect path.
//!
//! [`close`]: ConnectionHandle::close

use crate::error::{CloseError, ConnectError, HandleFailure, PublishError, SubscribeError};
use crate::transport::{
    ClientOptions, Connector, EventStream, InboundMessage, OutboundMessage, Session, SessionEvent,
};
use bytes::Bytes;
use overload_common::QosLevel;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Invoked once per inbound delivery, on the handle's event task.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

pub type FailureSender = mpsc::UnboundedSender<HandleFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CloseOptions {
    /// How long to wait for the event loop to wind down after DISCONNECT.
    pub timeout: Duration,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Value of the `timestamp` user property sent with the message.
    pub timestamp_ms: i64,
}

struct Slot<S> {
    state: ConnectionState,
    session: Option<S>,
}

struct Shared<S> {
    options: ClientOptions,
    slot: Mutex<Slot<S>>,
    state_tx: watch::Sender<ConnectionState>,
    failures: FailureSender,
}

impl<S: Session> Shared<S> {
    fn slot(&self) -> MutexGuard<'_, Slot<S>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, slot: &mut Slot<S>, next: ConnectionState) {
        slot.state = next;
        self.state_tx.send_replace(next);
    }

    /// Moves to `next` unless the handle was closed meanwhile.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut slot = self.slot();
        if slot.state == ConnectionState::Closed {
            return false;
        }
        self.set(&mut slot, next);
        true
    }

    fn connected_session(&self) -> Option<S> {
        let slot = self.slot();
        if slot.state == ConnectionState::Connected {
            slot.session.clone()
        } else {
            None
        }
    }

    fn client_id(&self) -> &str {
        &self.options.client_id
    }
}

pub struct ConnectionHandle<C: Connector> {
    connector: Arc<C>,
    shared: Arc<Shared<C::Session>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> ConnectionHandle<C> {
    pub fn new(options: ClientOptions, connector: Arc<C>, failures: FailureSender) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            shared: Arc::new(Shared {
                options,
                slot: Mutex::new(Slot {
                    state: ConnectionState::Disconnected,
                    session: None,
                }),
                state_tx,
                failures,
            }),
            pump: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        self.shared.client_id()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.slot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    fn pump_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects and starts the event task. `on_message` is the one callback
    /// for this connection; `None` discards inbound deliveries.
    pub async fn connect(
        &self,
        on_message: Option<MessageCallback>,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        {
            let mut slot = self.shared.slot();
            match slot.state {
                ConnectionState::Closed => return Err(ConnectError::Closed),
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    return Err(ConnectError::InProgress)
                }
                ConnectionState::Disconnected => {
                    self.shared.set(&mut slot, ConnectionState::Connecting)
                }
            }
        }

        let options = &self.shared.options;
        let broker = options.broker_addr();
        info!(client_id = %options.client_id, broker = %broker, "Connecting to MQTT broker");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            res = self.connector.connect(options) => res,
        };

        let (session, events) = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.shared.transition(ConnectionState::Disconnected);
                if !matches!(e, ConnectError::Cancelled) {
                    error!(
                        client_id = %options.client_id,
                        broker = %broker,
                        error = %e,
                        "Failed to connect to the broker. Check the configuration."
                    );
                }
                return Err(e);
            }
        };

        let rejected = {
            let mut slot = self.shared.slot();
            if slot.state == ConnectionState::Closed {
                Some(session)
            } else {
                slot.session = Some(session);
                self.shared.set(&mut slot, ConnectionState::Connected);
                None
            }
        };
        if let Some(session) = rejected {
            let _ = session.disconnect().await;
            return Err(ConnectError::Closed);
        }

        let pump = tokio::spawn(run_event_pump(
            Arc::clone(&self.shared),
            events,
            on_message,
        ));
        if let Some(stale) = self.pump_slot().replace(pump) {
            stale.abort();
        }

        info!(client_id = %options.client_id, broker = %broker, "Connected to MQTT broker");
        Ok(())
    }

    /// Publishes one JSON message at the configured QoS.
    pub async fn publish(
        &self,
        payload: Bytes,
        topic: &str,
        retain: bool,
        cancel: &CancellationToken,
    ) -> Result<PublishAck, PublishError> {
        let mut message = OutboundMessage::new(topic, payload, self.shared.options.qos, retain);
        self.publish_message(&mut message, cancel).await
    }

    /// Publishes `message`, refreshing its `timestamp` user property first.
    pub async fn publish_message(
        &self,
        message: &mut OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<PublishAck, PublishError> {
        let session = self
            .shared
            .connected_session()
            .ok_or(PublishError::NotConnected)?;
        let timestamp_ms = message.refresh_timestamp();

        debug!(
            client_id = %self.client_id(),
            topic = %message.topic,
            retain = message.retain,
            "Publishing message"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PublishError::Cancelled),
            res = session.publish(message.clone()) => {
                res?;
                debug!(client_id = %self.client_id(), topic = %message.topic, "Published message");
                Ok(PublishAck { timestamp_ms })
            }
        }
    }

    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QosLevel,
        cancel: &CancellationToken,
    ) -> Result<(), SubscribeError> {
        let session = self
            .shared
            .connected_session()
            .ok_or(SubscribeError::NotConnected)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SubscribeError::Cancelled),
            res = session.subscribe(filter, qos) => res,
        }
    }

    pub async fn unsubscribe(
        &self,
        filter: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SubscribeError> {
        let session = self
            .shared
            .connected_session()
            .ok_or(SubscribeError::NotConnected)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SubscribeError::Cancelled),
            res = session.unsubscribe(filter) => res,
        }
    }

    /// Sends DISCONNECT and waits for the event task to finish. Idempotent:
    /// a closed or never-connected handle returns `Ok` without side effects.
    pub async fn close(
        &self,
        options: &CloseOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CloseError> {
        let session = {
            let mut slot = self.shared.slot();
            if slot.state == ConnectionState::Closed {
                return Ok(());
            }
            self.shared.set(&mut slot, ConnectionState::Closed);
            slot.session.take()
        };
        let pump = self.pump_slot().take();
        let abort = pump.as_ref().map(|p| p.abort_handle());

        let Some(session) = session else {
            if let Some(abort) = abort {
                abort.abort();
            }
            return Ok(());
        };

        let broker = self.shared.options.broker_addr();
        info!(client_id = %self.client_id(), broker = %broker, "Closing connection");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CloseError::Cancelled),
            res = disconnect_and_drain(session, pump, options.timeout) => res,
        };

        if let Some(abort) = abort {
            abort.abort();
        }

        match &result {
            Ok(()) => {
                info!(client_id = %self.client_id(), broker = %broker, "Closed connection")
            }
            Err(e) => warn!(
                client_id = %self.client_id(),
                broker = %broker,
                error = %e,
                "Connection did not close cleanly"
            ),
        }
        result
    }
}

impl<C: Connector> Drop for ConnectionHandle<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump_slot().take() {
            pump.abort();
        }
    }
}

async fn disconnect_and_drain<S: Session>(
    session: S,
    pump: Option<JoinHandle<()>>,
    timeout: Duration,
) -> Result<(), CloseError> {
    session.disconnect().await?;
    if let Some(pump) = pump {
        if tokio::time::timeout(timeout, pump).await.is_err() {
            return Err(CloseError::Timeout(timeout));
        }
    }
    Ok(())
}

async fn run_event_pump<S: Session, E: EventStream>(
    shared: Arc<Shared<S>>,
    mut events: E,
    on_message: Option<MessageCallback>,
) {
    let broker = shared.options.broker_addr();

    loop {
        match events.next_event().await {
            SessionEvent::Message(message) => {
                if let Some(callback) = &on_message {
                    callback(message);
                }
            }
            SessionEvent::Dropped(reason) => {
                if !shared.transition(ConnectionState::Reconnecting) {
                    debug!(client_id = %shared.client_id(), "Event loop stopped after close");
                    break;
                }
                warn!(
                    client_id = %shared.client_id(),
                    broker = %broker,
                    reason = %reason,
                    "Disconnected from broker"
                );

                match events.reconnect().await {
                    Ok(()) => {
                        if !shared.transition(ConnectionState::Connected) {
                            break;
                        }
                        warn!(client_id = %shared.client_id(), broker = %broker, "Reconnected to broker");
                    }
                    Err(e) => {
                        error!(
                            client_id = %shared.client_id(),
                            broker = %broker,
                            error = %e,
                            "Unable to reconnect to broker"
                        );
                        let lost = {
                            let mut slot = shared.slot();
                            if slot.state == ConnectionState::Closed {
                                false
                            } else {
                                slot.session = None;
                                shared.set(&mut slot, ConnectionState::Disconnected);
                                true
                            }
                        };
                        if lost {
                            let _ = shared.failures.send(HandleFailure {
                                client_id: shared.client_id().to_string(),
                                broker: broker.clone(),
                                reason: e.to_string(),
                            });
                        }
                        break;
                    }
                }
            }
        }
    }
}
