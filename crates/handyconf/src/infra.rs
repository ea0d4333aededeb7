//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Network bind address for the HTTP command surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Interface to listen on.
    /// Default: 127.0.0.1 (local control only)
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// HTTP port for commands, status, and health.
    /// Default: 8080
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_http_port() -> u16 {
        8080
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Logging and OpenTelemetry export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Empty disables export and leaves plain logging.
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter directive (same syntax as RUST_LOG).
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Device hub (Intiface / Buttplug server) connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Candidate WebSocket endpoints, tried in order until one accepts.
    #[serde(default = "HubConfig::default_endpoints")]
    pub endpoints: Vec<String>,

    /// Client name announced during the handshake.
    #[serde(default = "HubConfig::default_client_name")]
    pub client_name: String,

    /// Per-endpoint connect timeout.
    #[serde(default = "HubConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long to wait for the hub to answer a single request.
    #[serde(default = "HubConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound on the best-effort disconnect at process stop.
    #[serde(default = "HubConfig::default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl HubConfig {
    fn default_endpoints() -> Vec<String> {
        vec!["ws://127.0.0.1:12345".to_string()]
    }

    fn default_client_name() -> String {
        "handyd".to_string()
    }

    fn default_connect_timeout_ms() -> u64 {
        5000
    }

    fn default_request_timeout_ms() -> u64 {
        2000
    }

    fn default_shutdown_timeout_ms() -> u64 {
        2000
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoints: Self::default_endpoints(),
            client_name: Self::default_client_name(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            shutdown_timeout_ms: Self::default_shutdown_timeout_ms(),
        }
    }
}

/// Complete infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub hub: HubConfig,
}
