//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the mediator.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::http::DEFAULT_MAX_REQUEST_BYTES;
use crate::mediator::FanoutPolicy;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MediatorConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Buffer and frame size limits.
    pub limits: LimitsConfig,

    /// Enabled protocol versions and validator settings.
    pub protocol: ProtocolConfig,

    /// Which handlers observe close and error events.
    pub fanout: FanoutPolicy,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Hosted applications.
    pub applications: Vec<ApplicationConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes buffered while waiting for a complete upgrade request.
    pub max_request_bytes: usize,

    /// Largest single frame payload accepted from a client.
    pub max_frame_bytes: usize,

    /// Largest reassembled message accepted from a client.
    pub max_message_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_frame_bytes: 16 * 1024 * 1024,
            max_message_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Protocol version configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Enabled codec ids, in selection order.
    pub versions: Vec<String>,

    /// Reject text messages that are not valid UTF-8.
    pub utf8_checks: bool,

    /// Value of the server identification header.
    pub server_name: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            versions: vec!["rfc6455".to_string(), "hybi10".to_string()],
            utf8_checks: true,
            server_name: concat!("websocket-mediator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One hosted application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// Unique name; also the first path segment for path-based routing.
    pub name: String,

    /// Hosts routed to this application regardless of path.
    #[serde(default)]
    pub virtual_hosts: Vec<String>,

    /// Handlers keyed by path inside the application.
    #[serde(default)]
    pub handlers: Vec<HandlerSpec>,
}

/// One handler binding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerSpec {
    /// Path inside the application, starting with `/`.
    pub path: String,

    /// Built-in handler kind (e.g., "echo").
    pub kind: String,

    /// Sub-protocols this handler agrees to.
    #[serde(default)]
    pub sub_protocols: Vec<String>,

    /// Free-form parameters passed to `Handler::init`.
    #[serde(default)]
    pub params: toml::Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: MediatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.limits.max_request_bytes, 4096);
        assert_eq!(config.protocol.versions, vec!["rfc6455", "hybi10"]);
        assert_eq!(config.fanout, FanoutPolicy::Broadcast);
        assert!(config.applications.is_empty());
    }

    #[test]
    fn parses_applications() {
        let config: MediatorConfig = toml::from_str(
            r#"
            fanout = "owner"

            [listener]
            bind_address = "127.0.0.1:9000"

            [[applications]]
            name = "myapp"
            virtual_hosts = ["example.com"]

            [[applications.handlers]]
            path = "/chat"
            kind = "echo"
            sub_protocols = ["chat.v1"]
            params = { greeting = "hello" }
            "#,
        )
        .unwrap();

        assert_eq!(config.fanout, FanoutPolicy::Owner);
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        let app = &config.applications[0];
        assert_eq!(app.name, "myapp");
        assert_eq!(app.virtual_hosts, vec!["example.com"]);
        assert_eq!(app.handlers[0].sub_protocols, vec!["chat.v1"]);
        assert_eq!(app.handlers[0].params["greeting"].as_str(), Some("hello"));
    }
}
