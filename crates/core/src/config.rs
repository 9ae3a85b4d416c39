//! Terminal configuration

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::Result;

/// Per-terminal configuration
///
/// Identity and credentials are required; every tunable has a default.
/// Built once with the `with_*` setters, then shared read-only with the
/// engine that owns the terminal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalConfig {
    pub device_id: String,
    pub device_type: String,
    /// WebSocket endpoint, e.g. `wss://platform.example.com/signals`
    pub endpoint: String,
    pub tenant_id: String,
    pub product_id: String,
    pub product_key: String,

    /// Deliver inbound directives to observers
    #[serde(default = "defaults::enable_directive_receiving")]
    pub enable_directive_receiving: bool,

    #[serde(default = "defaults::connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "defaults::heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Ceiling for serialized text messages, in bytes
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,

    /// Negative means retry forever
    #[serde(default = "defaults::max_reconnect_attempts")]
    pub max_reconnect_attempts: i32,

    #[serde(default = "defaults::base_reconnect_interval_ms")]
    pub base_reconnect_interval_ms: u64,

    #[serde(default = "defaults::max_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,

    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: f64,

    /// Fraction of the bounded delay used as +/- jitter range
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

mod defaults {
    pub fn enable_directive_receiving() -> bool {
        true
    }
    pub fn connection_timeout_ms() -> u64 {
        10_000
    }
    pub fn heartbeat_interval_ms() -> u64 {
        5_000
    }
    pub fn max_message_size() -> usize {
        10 * 1024 * 1024
    }
    pub fn max_reconnect_attempts() -> i32 {
        -1
    }
    pub fn base_reconnect_interval_ms() -> u64 {
        1_000
    }
    pub fn max_reconnect_interval_ms() -> u64 {
        60_000
    }
    pub fn backoff_factor() -> f64 {
        2.0
    }
    pub fn jitter_factor() -> f64 {
        0.1
    }
}

impl TerminalConfig {
    /// Create config with required identity and credentials
    pub fn new(
        device_id: impl Into<String>,
        device_type: impl Into<String>,
        endpoint: impl Into<String>,
        tenant_id: impl Into<String>,
        product_id: impl Into<String>,
        product_key: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: device_type.into(),
            endpoint: endpoint.into(),
            tenant_id: tenant_id.into(),
            product_id: product_id.into(),
            product_key: product_key.into(),
            enable_directive_receiving: defaults::enable_directive_receiving(),
            connection_timeout_ms: defaults::connection_timeout_ms(),
            heartbeat_interval_ms: defaults::heartbeat_interval_ms(),
            max_message_size: defaults::max_message_size(),
            max_reconnect_attempts: defaults::max_reconnect_attempts(),
            base_reconnect_interval_ms: defaults::base_reconnect_interval_ms(),
            max_reconnect_interval_ms: defaults::max_reconnect_interval_ms(),
            backoff_factor: defaults::backoff_factor(),
            jitter_factor: defaults::jitter_factor(),
        }
    }

    pub fn with_directive_receiving(mut self, enable: bool) -> Self {
        self.enable_directive_receiving = enable;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: i32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set base and maximum reconnect backoff intervals
    pub fn with_reconnect_intervals(mut self, base: Duration, max: Duration) -> Self {
        self.base_reconnect_interval_ms = duration_ms(base);
        self.max_reconnect_interval_ms = duration_ms(max);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Build the authenticated WebSocket URL for one connect attempt
    ///
    /// `<endpoint>?tenantId=..&productId=..&productKey=..[&traceId=..]`
    pub fn websocket_url(&self, trace_id: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("tenantId", &self.tenant_id)
                .append_pair("productId", &self.product_id)
                .append_pair("productKey", &self.product_key);
            if let Some(trace_id) = trace_id.filter(|t| !t.is_empty()) {
                query.append_pair("traceId", trace_id);
            }
        }
        Ok(url)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TerminalConfig {
        TerminalConfig::new(
            "dev-1",
            "speaker",
            "wss://platform.example.com/signals",
            "tenant",
            "product",
            "secret",
        )
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert!(config.enable_directive_receiving);
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.max_reconnect_attempts, -1);
        assert_eq!(config.base_reconnect_interval_ms, 1_000);
        assert_eq!(config.max_reconnect_interval_ms, 60_000);
    }

    #[test]
    fn test_builder_setters() {
        let config = sample()
            .with_heartbeat_interval(Duration::from_millis(250))
            .with_max_reconnect_attempts(3)
            .with_reconnect_intervals(Duration::from_millis(100), Duration::from_secs(2))
            .with_jitter_factor(0.0)
            .with_directive_receiving(false);
        assert_eq!(config.heartbeat_interval_ms, 250);
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.base_reconnect_interval_ms, 100);
        assert_eq!(config.max_reconnect_interval_ms, 2_000);
        assert_eq!(config.jitter_factor, 0.0);
        assert!(!config.enable_directive_receiving);
    }

    #[test]
    fn test_websocket_url() {
        let url = sample().websocket_url(None).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://platform.example.com/signals?tenantId=tenant&productId=product&productKey=secret"
        );
    }

    #[test]
    fn test_websocket_url_with_trace_id() {
        let url = sample().websocket_url(Some("trace-42")).unwrap();
        assert!(url.as_str().ends_with("&traceId=trace-42"));

        let url = sample().websocket_url(Some("")).unwrap();
        assert!(!url.as_str().contains("traceId"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = sample();
        config.endpoint = "not a url".to_string();
        assert!(config.websocket_url(None).is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "deviceId": "dev-9",
            "deviceType": "sensor",
            "endpoint": "ws://localhost:9000/ws",
            "tenantId": "t",
            "productId": "p",
            "productKey": "k",
            "maxReconnectAttempts": 5
        }"#;
        let config: TerminalConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device_id, "dev-9");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.heartbeat_interval_ms, 5_000);
        assert!(config.enable_directive_receiving);
    }
}
