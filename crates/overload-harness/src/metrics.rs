use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Load counters for one harness process, exposed in the Prometheus text
/// format when the metrics endpoint is enabled.
pub struct Metrics {
    registry: Registry,
    pub published: IntCounter,
    pub received: IntCounter,
    /// Inbound payloads dropped because they did not decode.
    pub decode_failures: IntCounter,
    pub handle_failures: IntCounter,
    pub connected_clients: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let published = IntCounter::new(
            "overload_published_total",
            "Total number of messages accepted for publishing",
        )?;
        let received = IntCounter::new(
            "overload_received_total",
            "Total number of messages received and decoded by subscribers",
        )?;
        let decode_failures = IntCounter::new(
            "overload_decode_failures_total",
            "Total number of inbound payloads dropped because they failed to decode",
        )?;
        let handle_failures = IntCounter::new(
            "overload_handle_failures_total",
            "Total number of clients lost after a failed reconnect",
        )?;
        let connected_clients = IntGauge::new(
            "overload_connected_clients",
            "Number of clients connected after startup",
        )?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(handle_failures.clone()))?;
        registry.register(Box::new(connected_clients.clone()))?;

        Ok(Self {
            registry,
            published,
            received,
            decode_failures,
            handle_failures,
            connected_clients,
        })
    }

    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
    }
}
