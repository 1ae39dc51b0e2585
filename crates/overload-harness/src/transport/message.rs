use bytes::Bytes;
use overload_common::QosLevel;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const TIMESTAMP_PROPERTY: &str = "timestamp";

/// How far ahead of the clock a prior stamp may be and still be bumped.
const REFRESH_WINDOW_MS: i64 = 100;

/// One application message handed to a session for publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,
    pub content_type: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: Bytes, qos: QosLevel, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain,
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            user_properties: Vec::new(),
        }
    }

    pub fn user_property(&self, name: &str) -> Option<&str> {
        self.user_properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.user_property(TIMESTAMP_PROPERTY)?.parse().ok()
    }

    /// Replaces the `timestamp` user property with the current Unix time in
    /// milliseconds. Two refreshes within the same millisecond still yield
    /// distinct values; a stale or far-future value is simply overwritten.
    pub fn refresh_timestamp(&mut self) -> i64 {
        let previous = self.timestamp_ms();
        self.user_properties
            .retain(|(key, _)| key != TIMESTAMP_PROPERTY);

        let now = chrono::Utc::now().timestamp_millis();
        let stamp = match previous {
            Some(prev) if prev >= now && prev - now < REFRESH_WINDOW_MS => {
                prev.saturating_add(1)
            }
            _ => now,
        };
        self.user_properties
            .push((TIMESTAMP_PROPERTY.to_string(), stamp.to_string()));
        stamp
    }
}

/// One delivery received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Broker-assigned packet identifier; absent for QoS 0 deliveries.
    pub packet_id: Option<u16>,
    pub qos: QosLevel,
    pub user_properties: Vec<(String, String)>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            packet_id: None,
            qos: QosLevel::AtMostOnce,
            user_properties: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutboundMessage {
        OutboundMessage::new(
            "overload/ce/0001",
            Bytes::from_static(b"{}"),
            QosLevel::AtLeastOnce,
            false,
        )
    }

    #[test]
    fn new_message_is_json() {
        assert_eq!(message().content_type.as_deref(), Some(CONTENT_TYPE_JSON));
    }

    #[test]
    fn refresh_keeps_a_single_timestamp_entry() {
        let mut msg = message();
        msg.user_properties
            .push((TIMESTAMP_PROPERTY.into(), "1".into()));
        msg.user_properties.push(("origin".into(), "test".into()));

        msg.refresh_timestamp();
        msg.refresh_timestamp();

        let stamps = msg
            .user_properties
            .iter()
            .filter(|(k, _)| k == TIMESTAMP_PROPERTY)
            .count();
        assert_eq!(stamps, 1);
        assert_eq!(msg.user_property("origin"), Some("test"));
    }

    #[test]
    fn refresh_is_strictly_increasing() {
        let mut msg = message();
        let first = msg.refresh_timestamp();
        let second = msg.refresh_timestamp();
        assert!(second > first);
        assert_eq!(msg.timestamp_ms(), Some(second));
    }

    #[test]
    fn future_timestamp_is_replaced_with_now() {
        let mut msg = message();
        let an_hour_ahead = chrono::Utc::now().timestamp_millis() + 3_600_000;
        msg.user_properties
            .push((TIMESTAMP_PROPERTY.into(), an_hour_ahead.to_string()));

        let stamp = msg.refresh_timestamp();
        let now = chrono::Utc::now().timestamp_millis();
        assert!((now - stamp).abs() < 2_000);
        assert_eq!(msg.timestamp_ms(), Some(stamp));
    }

    #[test]
    fn max_timestamp_does_not_overflow() {
        let mut msg = message();
        msg.user_properties
            .push((TIMESTAMP_PROPERTY.into(), i64::MAX.to_string()));

        let stamp = msg.refresh_timestamp();
        let now = chrono::Utc::now().timestamp_millis();
        assert!((now - stamp).abs() < 2_000);
    }

    #[test]
    fn refresh_tracks_wall_clock() {
        let mut msg = message();
        let stamp = msg.refresh_timestamp();
        let now = chrono::Utc::now().timestamp_millis();
        assert!((now - stamp).abs() < 2_000);
    }
}
