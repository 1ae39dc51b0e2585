#![allow(dead_code)]

use async_trait::async_trait;
use overload_common::{BrokerConfig, QosLevel};
use overload_harness::error::{CloseError, ConnectError, PublishError, SubscribeError};
use overload_harness::transport::{
    ClientOptions, Connector, EventStream, InboundMessage, OutboundMessage, Session, SessionEvent,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Barrier, Notify};

/// Everything the broker saw, in arrival order.
#[derive(Default)]
pub struct Recorded {
    pub connects: Vec<String>,
    pub publishes: Vec<(String, OutboundMessage)>,
    pub subscribes: Vec<(String, String, QosLevel)>,
    pub unsubscribes: Vec<(String, String)>,
    pub disconnects: Vec<String>,
}

#[derive(Default)]
struct Inner {
    recorded: Mutex<Recorded>,
    reconnects: AtomicUsize,
    refused: Mutex<HashSet<String>>,
    fail_reconnect: AtomicBool,
    reconnect_gate: Mutex<Option<Arc<Notify>>>,
    reject_subscriptions: AtomicBool,
    failing_topic: Mutex<Option<String>>,
    publish_barrier: Mutex<Option<Arc<Barrier>>>,
    links: Mutex<HashMap<String, mpsc::UnboundedSender<SessionEvent>>>,
}

/// In-memory stand-in for an MQTT broker and client library.
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Inner>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<MockBroker> {
        Arc::new(self.clone())
    }

    pub fn recorded<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&self.inner.recorded.lock().unwrap())
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, client_id: &str) {
        self.inner.refused.lock().unwrap().insert(client_id.to_string());
    }

    pub fn fail_reconnects(&self, fail: bool) {
        self.inner.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    /// Reconnect attempts wait until [`MockBroker::release_reconnect`].
    pub fn hold_reconnects(&self) {
        *self.inner.reconnect_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    }

    pub fn release_reconnect(&self) {
        if let Some(gate) = self.inner.reconnect_gate.lock().unwrap().as_ref() {
            gate.notify_one();
        }
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.inner.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    pub fn fail_publishes_to(&self, topic: &str) {
        *self.inner.failing_topic.lock().unwrap() = Some(topic.to_string());
    }

    /// Every publish waits on a barrier of `parties` before it is recorded.
    pub fn hold_publishes(&self, parties: usize) {
        *self.inner.publish_barrier.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn release_publishes(&self) {
        *self.inner.publish_barrier.lock().unwrap() = None;
    }

    /// Simulates the transport of `client_id` going away.
    pub fn drop_connection(&self, client_id: &str) {
        if let Some(link) = self.inner.links.lock().unwrap().get(client_id) {
            let _ = link.send(SessionEvent::Dropped("connection reset by peer".into()));
        }
    }

    pub fn deliver(&self, client_id: &str, message: InboundMessage) {
        if let Some(link) = self.inner.links.lock().unwrap().get(client_id) {
            let _ = link.send(SessionEvent::Message(message));
        }
    }
}

#[async_trait]
impl Connector for MockBroker {
    type Session = MockSession;
    type Events = MockEvents;

    async fn connect(
        &self,
        options: &ClientOptions,
    ) -> Result<(MockSession, MockEvents), ConnectError> {
        let client_id = options.client_id.clone();
        self.inner
            .recorded
            .lock()
            .unwrap()
            .connects
            .push(client_id.clone());

        if self.inner.refused.lock().unwrap().contains(&client_id) {
            return Err(ConnectError::Refused {
                reason: "NotAuthorized".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.links.lock().unwrap().insert(client_id.clone(), tx);

        Ok((
            MockSession {
                client_id,
                inner: Arc::clone(&self.inner),
            },
            MockEvents {
                rx,
                inner: Arc::clone(&self.inner),
            },
        ))
    }
}

#[derive(Clone)]
pub struct MockSession {
    client_id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl Session for MockSession {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let barrier = self.inner.publish_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let failing = self.inner.failing_topic.lock().unwrap().clone();
        if failing.as_deref() == Some(message.topic.as_str()) {
            return Err(PublishError::Transport("broker rejected publish".into()));
        }

        self.inner
            .recorded
            .lock()
            .unwrap()
            .publishes
            .push((self.client_id.clone(), message));
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QosLevel) -> Result<(), SubscribeError> {
        if self.inner.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(SubscribeError::Rejected {
                filter: filter.to_string(),
                reason: "NotAuthorized".into(),
            });
        }
        self.inner.recorded.lock().unwrap().subscribes.push((
            self.client_id.clone(),
            filter.to_string(),
            qos,
        ));
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), SubscribeError> {
        self.inner
            .recorded
            .lock()
            .unwrap()
            .unsubscribes
            .push((self.client_id.clone(), filter.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CloseError> {
        self.inner
            .recorded
            .lock()
            .unwrap()
            .disconnects
            .push(self.client_id.clone());
        if let Some(link) = self.inner.links.lock().unwrap().remove(&self.client_id) {
            let _ = link.send(SessionEvent::Dropped("disconnected by client".into()));
        }
        Ok(())
    }
}

pub struct MockEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    inner: Arc<Inner>,
}

#[async_trait]
impl EventStream for MockEvents {
    async fn next_event(&mut self) -> SessionEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn reconnect(&mut self) -> Result<(), ConnectError> {
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);
        let gate = self.inner.reconnect_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.inner.fail_reconnect.load(Ordering::SeqCst) {
            Err(ConnectError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// Options for `client-0 .. client-{n-1}` against the default broker.
pub fn client_options(n: usize) -> Vec<ClientOptions> {
    (0..n)
        .map(|i| ClientOptions::from_broker(&BrokerConfig::default(), format!("client-{}", i)))
        .collect()
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
