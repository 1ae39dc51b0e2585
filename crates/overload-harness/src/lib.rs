pub mod cli;
pub mod codec;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod transport;

pub use codec::{Payload, PayloadCodec};
pub use engine::coordinator::Coordinator;
pub use engine::handle::{CloseOptions, ConnectionHandle, ConnectionState};
pub use engine::pool::Pool;
pub use engine::publisher::PublisherDriver;
pub use engine::subscriber::{SubscriberDriver, SubscriberPhase};
pub use metrics::Metrics;
