//! `rumqttc` (MQTT 5) backed implementation of the transport traits.

use super::{
    ClientOptions, Connector, EventStream, InboundMessage, OutboundMessage, Session, SessionEvent,
};
use crate::error::{CloseError, ConnectError, PublishError, SubscribeError};
use async_trait::async_trait;
use overload_common::QosLevel;
use rumqttc::v5::mqttbytes::v5::{
    ConnectProperties, ConnectReturnCode, Packet, Publish, PublishProperties,
    SubscribeReasonCode,
};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use rumqttc::Transport;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

fn to_qos(level: QosLevel) -> QoS {
    match level {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_qos(qos: QoS) -> QosLevel {
    match qos {
        QoS::AtMostOnce => QosLevel::AtMostOnce,
        QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

/// Builds protocol-5 options. A WebSocket path switches the transport and
/// turns the broker address into a `ws://` URL.
pub fn mqtt_options(options: &ClientOptions) -> MqttOptions {
    let mut mqtt = match &options.websocket_path {
        Some(path) => {
            let url = format!(
                "ws://{}:{}/{}",
                options.host,
                options.port,
                path.trim_start_matches('/')
            );
            let mut mqtt = MqttOptions::new(options.client_id.clone(), url, options.port);
            mqtt.set_transport(Transport::Ws);
            mqtt
        }
        None => MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port),
    };

    // Must come first: the other property setters write into this struct.
    let mut props = ConnectProperties::new();
    props.session_expiry_interval =
        Some(u32::try_from(options.session_expiry.as_secs()).unwrap_or(u32::MAX));
    mqtt.set_connect_properties(props);

    mqtt.set_keep_alive(options.keep_alive);
    mqtt.set_clean_start(!options.persistent_session);

    if let Some(creds) = &options.credentials {
        mqtt.set_credentials(creds.username.clone(), creds.password.clone());
    }

    mqtt
}

/// Polls until the broker answers CONNECT.
async fn await_connack(event_loop: &mut EventLoop) -> Result<(), ConnectError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ConnectError::Refused {
                        reason: format!("{:?}", ack.code),
                    })
                };
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(ConnectError::Refused {
                    reason: format!("{:?}", code),
                })
            }
            Err(e) => return Err(ConnectError::Transport(e.to_string())),
        }
    }
}

fn inbound(publish: Publish) -> InboundMessage {
    let qos = from_qos(publish.qos);
    InboundMessage {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload,
        packet_id: (qos != QosLevel::AtMostOnce).then_some(publish.pkid),
        qos,
        user_properties: publish
            .properties
            .map(|props| props.user_properties)
            .unwrap_or_default(),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RumqttConnector;

#[async_trait]
impl Connector for RumqttConnector {
    type Session = RumqttSession;
    type Events = RumqttEvents;

    async fn connect(
        &self,
        options: &ClientOptions,
    ) -> Result<(RumqttSession, RumqttEvents), ConnectError> {
        let (client, mut event_loop) =
            AsyncClient::new(mqtt_options(options), options.request_capacity);

        await_connack(&mut event_loop).await?;

        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        Ok((
            RumqttSession {
                client,
                sub_acks: Arc::new(Mutex::new(ack_rx)),
            },
            RumqttEvents {
                event_loop,
                sub_acks: ack_tx,
            },
        ))
    }
}

#[derive(Clone)]
pub struct RumqttSession {
    client: AsyncClient,
    /// SUBACK reason codes forwarded by the event loop. The lock keeps
    /// one subscribe in flight per session so acks pair up in order.
    sub_acks: Arc<Mutex<mpsc::UnboundedReceiver<SubAck>>>,
}

/// SUBACK reason codes, or the reason the transport dropped before one came.
type SubAck = Result<Vec<SubscribeReasonCode>, String>;

/// Discards acks left over from requests that are no longer waiting.
fn drain_stale(acks: &mut mpsc::UnboundedReceiver<SubAck>) {
    while acks.try_recv().is_ok() {}
}

async fn await_suback(
    acks: &mut mpsc::UnboundedReceiver<SubAck>,
    filter: &str,
) -> Result<(), SubscribeError> {
    match acks.recv().await {
        Some(Ok(codes))
            if codes
                .iter()
                .all(|c| matches!(c, SubscribeReasonCode::Success(_))) =>
        {
            Ok(())
        }
        Some(Ok(codes)) => Err(SubscribeError::Rejected {
            filter: filter.to_string(),
            reason: format!("{:?}", codes),
        }),
        Some(Err(reason)) => Err(SubscribeError::Transport(reason)),
        None => Err(SubscribeError::Transport("event loop stopped".into())),
    }
}

#[async_trait]
impl Session for RumqttSession {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let properties = PublishProperties {
            content_type: message.content_type,
            user_properties: message.user_properties,
            ..Default::default()
        };
        self.client
            .publish_with_properties(
                message.topic,
                to_qos(message.qos),
                message.retain,
                message.payload,
                properties,
            )
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }

    async fn subscribe(&self, filter: &str, qos: QosLevel) -> Result<(), SubscribeError> {
        let mut acks = self.sub_acks.lock().await;
        drain_stale(&mut acks);
        self.client
            .subscribe(filter, to_qos(qos))
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))?;

        await_suback(&mut acks, filter).await
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), SubscribeError> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), CloseError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| CloseError::Transport(e.to_string()))
    }
}

pub struct RumqttEvents {
    event_loop: EventLoop,
    sub_acks: mpsc::UnboundedSender<SubAck>,
}

#[async_trait]
impl EventStream for RumqttEvents {
    async fn next_event(&mut self) -> SessionEvent {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return SessionEvent::Message(inbound(publish));
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let _ = self.sub_acks.send(Ok(ack.return_codes));
                }
                Ok(event) => debug!(?event, "MQTT event"),
                Err(e) => {
                    // A SUBSCRIBE in flight is not resent after reconnect.
                    let reason = e.to_string();
                    let _ = self.sub_acks.send(Err(reason.clone()));
                    return SessionEvent::Dropped(reason);
                }
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), ConnectError> {
        // rumqttc re-dials on the first poll after an error.
        await_connack(&mut self.event_loop).await
    }
}
