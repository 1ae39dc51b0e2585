use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The record published once per topic suffix per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payload {
    pub x: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<String>,
}

impl Payload {
    /// A record for `suffix` stamped with the current UTC time.
    pub fn stamped(suffix: impl Into<String>) -> Self {
        Self {
            x: suffix.into(),
            value: sortable_now(),
            processed: None,
        }
    }
}

/// RFC 3339 UTC with fixed-width fractional seconds, so lexical order is
/// chronological order.
pub fn sortable_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
