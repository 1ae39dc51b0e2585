use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub publisher: PublisherConfig,
    pub subscriber: SubscriberConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Reads and validates a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host must not be blank".into()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must be non-zero".into()));
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "broker.keep_alive_secs must be at least 5".into(),
            ));
        }
        if self.publisher.clients == 0 || self.subscriber.clients == 0 {
            return Err(ConfigError::Invalid(
                "publisher.clients and subscriber.clients must be at least 1".into(),
            ));
        }
        if self.publisher.topic_count == 0 || self.subscriber.topic_count == 0 {
            return Err(ConfigError::Invalid("topic_count must be at least 1".into()));
        }
        if self.publisher.topic_width == 0 || self.subscriber.topic_width == 0 {
            return Err(ConfigError::Invalid("topic_width must be at least 1".into()));
        }
        if self.publisher.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "publisher.batch_size must be at least 1".into(),
            ));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Invalid("metrics.port must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// When set, clients connect over WebSocket instead of plain TCP.
    pub websocket_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: QosLevel,
    pub persistent_session: bool,
    pub session_expiry_secs: u64,
    pub keep_alive_secs: u64,
    /// Bounded request queue per client; publishes wait when it is full.
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            websocket_path: None,
            username: None,
            password: None,
            qos: QosLevel::AtLeastOnce,
            persistent_session: true,
            session_expiry_secs: 5 * 24 * 60 * 60,
            keep_alive_secs: 30,
            request_capacity: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PublisherConfig {
    pub clients: usize,
    pub client_id_prefix: String,
    pub topic_count: usize,
    pub topic_width: usize,
    pub batch_size: usize,
    pub topic_prefix: String,
    pub retain: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            clients: 20,
            client_id_prefix: "RustPublisher".into(),
            topic_count: 5,
            topic_width: 4,
            batch_size: 5,
            topic_prefix: "overload/ce".into(),
            retain: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SubscriberConfig {
    pub clients: usize,
    pub client_id: String,
    pub topic_count: usize,
    pub topic_width: usize,
    pub topic_prefix: String,
    /// Shared-subscription group. Empty means plain subscriptions.
    pub share_group: String,
    /// Subscription QoS, independent of the publish QoS in `broker`.
    pub qos: QosLevel,
    pub unsubscribe_on_shutdown: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            clients: 1,
            client_id: "RawSubscriber".into(),
            topic_count: 5,
            topic_width: 4,
            topic_prefix: "overload/ce".into(),
            share_group: "overloadtest".into(),
            qos: QosLevel::AtLeastOnce,
            unsubscribe_on_shutdown: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ShutdownConfig {
    pub close_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9100,
        }
    }
}
