//! Node-level configuration for the Courier runtime.
//!
//! Every section deserializes with defaults so a config file only needs the
//! keys it overrides. Durations are expressed in milliseconds.

use std::time::Duration;

use serde::Deserialize;

use crate::breaker::CircuitBreakerOptions;

/// Top-level configuration for one Courier node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CourierConfig {
    /// Present on nodes that host services. `None` makes a pure client.
    pub server: Option<ServerSettings>,
    /// Settings for outbound calls.
    pub client: ClientSettings,
    /// Global circuit breaker defaults. `None` disables the breaker unless a
    /// method supplies its own override.
    pub circuit_breaker: Option<CircuitBreakerOptions>,
    /// Global caching settings. `None` disables result caching.
    pub caching: Option<CachingOptions>,
    /// Largest accepted frame on any connection, in bytes.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl CourierConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or has fields of the
    /// wrong type.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn max_frame_length(&self) -> usize {
        if self.max_frame_length == 0 {
            default_max_frame_length()
        } else {
            self.max_frame_length
        }
    }
}

fn default_max_frame_length() -> usize {
    8 * 1024 * 1024
}

/// Settings for the inbound (server) side of a node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Address advertised to discovery. Defaults to `host` when unset.
    pub advertised_host: Option<String>,
    /// Maximum number of concurrently executing inbound calls before load shedding.
    pub max_concurrent_calls: u32,
    /// Bounded channel capacity for outbound replies per connection.
    pub outbound_channel_capacity: usize,
    /// Maximum time to wait when enqueueing a reply on a full connection.
    pub send_timeout_ms: u64,
    /// Maximum time to wait for in-flight calls during shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            advertised_host: None,
            max_concurrent_calls: 1000,
            outbound_channel_capacity: 256,
            send_timeout_ms: 5_000,
            shutdown_grace_ms: 30_000,
        }
    }
}

impl ServerSettings {
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Settings for the outbound (client) side of a node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    /// Deadline for a single remote call, from send to reply.
    pub invoke_timeout_ms: u64,
    /// Timeout for establishing a TCP connection to a node.
    pub connect_timeout_ms: u64,
    /// Grace period for stopping a connection's read/write tasks.
    pub disconnect_grace_ms: u64,
    /// Bounded channel capacity for outbound requests per connection.
    pub outbound_channel_capacity: usize,
    /// Interval between node health refreshes. 0 disables refreshing.
    pub node_status_refresh_interval_ms: u64,
    /// Grace period for stopping the refresh task at shutdown.
    pub refresh_stop_grace_ms: u64,
    /// Services that are always called remotely, even when a local handler exists.
    pub dependency_services: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            invoke_timeout_ms: 60_000,
            connect_timeout_ms: 5_000,
            disconnect_grace_ms: 1_000,
            outbound_channel_capacity: 256,
            node_status_refresh_interval_ms: 10_000,
            refresh_stop_grace_ms: 1_000,
            dependency_services: Vec::new(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    #[must_use]
    pub fn refresh_stop_grace(&self) -> Duration {
        Duration::from_millis(self.refresh_stop_grace_ms)
    }

    /// Returns `true` if `service` is declared as a remote dependency.
    #[must_use]
    pub fn is_dependency(&self, service: &str) -> bool {
        self.dependency_services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(service))
    }
}

/// Global caching settings applied to every value-returning route.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CachingOptions {
    /// Prefix prepended to every generated cache key.
    pub key_prefix: String,
    /// Default entry lifetime in seconds. 0 means no expiry.
    pub expire_seconds: u64,
    /// Capacity of the in-memory cache, in entries.
    pub capacity: usize,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            key_prefix: "courier:".to_string(),
            expire_seconds: 3600,
            capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_settings_defaults() {
        let client = ClientSettings::default();
        assert_eq!(client.invoke_timeout(), Duration::from_secs(60));
        assert_eq!(client.connect_timeout(), Duration::from_secs(5));
        assert_eq!(client.disconnect_grace(), Duration::from_secs(1));
        assert_eq!(client.node_status_refresh_interval_ms, 10_000);
        assert!(client.dependency_services.is_empty());
    }

    #[test]
    fn server_settings_defaults() {
        let server = ServerSettings::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 0);
        assert_eq!(server.max_concurrent_calls, 1000);
        assert_eq!(server.shutdown_grace(), Duration::from_secs(30));
    }

    #[test]
    fn empty_json_is_a_pure_client() {
        let config = CourierConfig::from_json_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.circuit_breaker.is_none());
        assert!(config.caching.is_none());
        assert_eq!(config.max_frame_length(), 8 * 1024 * 1024);
    }

    #[test]
    fn json_overrides_selected_fields() {
        let config = CourierConfig::from_json_str(
            r#"{
                "server": { "port": 5730 },
                "client": { "invokeTimeoutMs": 250, "dependencyServices": ["Calc"] },
                "circuitBreaker": { "timeoutMs": 100, "retry": 1 },
                "caching": { "keyPrefix": "test:" }
            }"#,
        )
        .unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.port, 5730);
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(config.client.invoke_timeout(), Duration::from_millis(250));
        assert!(config.client.is_dependency("calc"));
        assert!(!config.client.is_dependency("Auth"));

        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(breaker.timeout, Duration::from_millis(100));
        assert_eq!(breaker.retry, 1);

        let caching = config.caching.unwrap();
        assert_eq!(caching.key_prefix, "test:");
        assert_eq!(caching.expire_seconds, 3600);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(CourierConfig::from_json_str("{ not json").is_err());
    }
}
