pub mod payload;

use crate::error::{DecodeError, EncodeError};
use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;

pub use payload::Payload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    pub pretty: bool,
    /// Inbound payloads longer than this are rejected before parsing.
    pub max_payload_bytes: Option<usize>,
}

/// JSON codec for payload records.
///
/// Options are looked up per payload type; types without a registered
/// override use the codec defaults. Unit enum variants serialize by name.
#[derive(Debug, Default)]
pub struct PayloadCodec {
    defaults: CodecOptions,
    overrides: DashMap<TypeId, CodecOptions>,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: CodecOptions) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
        }
    }

    pub fn register<T: 'static>(&self, options: CodecOptions) {
        self.overrides.insert(TypeId::of::<T>(), options);
    }

    pub fn options_for<T: 'static>(&self) -> CodecOptions {
        self.overrides
            .get(&TypeId::of::<T>())
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn encode<T: Serialize + 'static>(&self, value: &T) -> Result<Bytes, EncodeError> {
        let options = self.options_for::<T>();
        let bytes = if options.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(Bytes::from(bytes))
    }

    pub fn decode<T: DeserializeOwned + 'static>(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        let options = self.options_for::<T>();
        if let Some(max) = options.max_payload_bytes {
            if bytes.len() > max {
                return Err(DecodeError::TooLarge {
                    len: bytes.len(),
                    max,
                });
            }
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
