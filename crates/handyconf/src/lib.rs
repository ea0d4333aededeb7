//! Configuration loading for handyd.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): things that cannot change while the
//!   daemon runs - bind address, hub endpoints, telemetry export.
//!
//! - **Bootstrap** (`BootstrapConfig`): initial values that seed the device
//!   session - motion timing, clamp bounds, scan window. After startup the
//!   session is the source of truth.
//!
//! # Usage
//!
//! ```rust,no_run
//! use handyconf::HandyConfig;
//!
//! let config = HandyConfig::load().expect("Failed to load config");
//! println!("HTTP: {}", config.infra.bind.addr());
//! for endpoint in &config.infra.hub.endpoints {
//!     println!("Hub candidate: {}", endpoint);
//! }
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/handyd/config.toml` (system)
//! 2. `~/.config/handyd/config.toml` (user)
//! 3. `./handyd.toml` (local override, or the `--config` path)
//! 4. Environment variables (`HANDYD_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "127.0.0.1"
//! http_port = 8080
//!
//! [hub]
//! endpoints = ["ws://127.0.0.1:12345", "ws://127.0.0.1:12346"]
//!
//! [telemetry]
//! log_level = "info"
//!
//! [bootstrap.motion]
//! base_duration_ms = 35
//! min_duration_ms = 20
//!
//! [bootstrap.scan]
//! window_ms = 2000
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, MotionConfig, ScanConfig};
pub use infra::{BindConfig, HubConfig, InfraConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete handyd configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandyConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds the session.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl HandyConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./handyd.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    ///
    /// The result is validated; an inconsistent config is an error.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = HandyConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            config = loader::load_from_file(config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        config.validate()?;
        Ok((config, sources))
    }

    /// Reject settings the session could not honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let motion = &self.bootstrap.motion;

        if self.infra.hub.endpoints.is_empty() {
            return Err(ConfigError::Invalid("hub.endpoints is empty".to_string()));
        }
        if !(motion.speed_min.is_finite() && motion.speed_max.is_finite()) {
            return Err(ConfigError::Invalid("speed bounds must be finite".to_string()));
        }
        if motion.speed_min <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "motion.speed_min must be positive, got {}",
                motion.speed_min
            )));
        }
        if motion.speed_min > motion.speed_max {
            return Err(ConfigError::Invalid(format!(
                "motion.speed_min ({}) exceeds motion.speed_max ({})",
                motion.speed_min, motion.speed_max
            )));
        }
        if motion.min_duration_ms == 0 {
            return Err(ConfigError::Invalid(
                "motion.min_duration_ms must be at least 1".to_string(),
            ));
        }
        if motion.min_duration_ms > motion.max_duration_ms {
            return Err(ConfigError::Invalid(format!(
                "motion.min_duration_ms ({}) exceeds motion.max_duration_ms ({})",
                motion.min_duration_ms, motion.max_duration_ms
            )));
        }
        if motion.retract_duration_ms < motion.min_duration_ms {
            return Err(ConfigError::Invalid(format!(
                "motion.retract_duration_ms ({}) is below motion.min_duration_ms ({})",
                motion.retract_duration_ms, motion.min_duration_ms
            )));
        }
        if self.bootstrap.scan.window_ms == 0 {
            return Err(ConfigError::Invalid("scan.window_ms must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();
        let infra = &self.infra;
        let motion = &self.bootstrap.motion;

        output.push_str("# handyd Configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", infra.bind.host));
        output.push_str(&format!("http_port = {}\n", infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("otlp_endpoint = \"{}\"\n", infra.telemetry.otlp_endpoint));
        output.push_str(&format!("log_level = \"{}\"\n", infra.telemetry.log_level));

        output.push_str("\n[hub]\n");
        output.push_str("endpoints = [\n");
        for endpoint in &infra.hub.endpoints {
            output.push_str(&format!("    \"{}\",\n", endpoint));
        }
        output.push_str("]\n");
        output.push_str(&format!("client_name = \"{}\"\n", infra.hub.client_name));
        output.push_str(&format!("connect_timeout_ms = {}\n", infra.hub.connect_timeout_ms));
        output.push_str(&format!("request_timeout_ms = {}\n", infra.hub.request_timeout_ms));
        output.push_str(&format!("shutdown_timeout_ms = {}\n", infra.hub.shutdown_timeout_ms));

        output.push_str("\n[bootstrap.motion]\n");
        output.push_str(&format!("base_duration_ms = {}\n", motion.base_duration_ms));
        output.push_str(&format!("min_duration_ms = {}\n", motion.min_duration_ms));
        output.push_str(&format!("max_duration_ms = {}\n", motion.max_duration_ms));
        output.push_str(&format!("retract_duration_ms = {}\n", motion.retract_duration_ms));
        output.push_str(&format!("speed_min = {:?}\n", motion.speed_min));
        output.push_str(&format!("speed_max = {:?}\n", motion.speed_max));
        output.push_str(&format!("initial_speed = {:?}\n", motion.initial_speed));

        output.push_str("\n[bootstrap.scan]\n");
        output.push_str(&format!("window_ms = {}\n", self.bootstrap.scan.window_ms));
        output.push_str(&format!("auto_connect = {}\n", self.bootstrap.scan.auto_connect));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HandyConfig::default();
        assert_eq!(config.infra.bind.http_port, 8080);
        assert_eq!(config.infra.hub.endpoints, vec!["ws://127.0.0.1:12345"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_round_trips_through_loader() {
        let mut config = HandyConfig::default();
        config.infra.hub.endpoints.push("ws://10.0.0.2:12345".to_string());
        config.bootstrap.motion.speed_max = 1.5;

        let toml = config.to_toml();
        assert!(toml.contains("[bind]"));
        assert!(toml.contains("[bootstrap.motion]"));

        let path = std::path::Path::new("rt.toml");
        let parsed = loader::parse_toml(HandyConfig::default(), &toml, path).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_inverted_speed_bounds() {
        let mut config = HandyConfig::default();
        config.bootstrap.motion.speed_min = 3.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let mut config = HandyConfig::default();
        config.infra.hub.endpoints.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_floor_above_ceiling() {
        let mut config = HandyConfig::default();
        config.bootstrap.motion.min_duration_ms = 500;
        config.bootstrap.motion.max_duration_ms = 100;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_retract_below_floor() {
        let mut config = HandyConfig::default();
        config.bootstrap.motion.retract_duration_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.bootstrap.motion.retract_duration_ms = config.bootstrap.motion.min_duration_ms;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handyd.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[bootstrap.scan]\nwindow_ms = 2750").unwrap();

        let (config, sources) = HandyConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.bootstrap.scan.window_ms, 2750);
        assert!(sources.files.contains(&path));
    }

    #[test]
    fn test_load_from_invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handyd.toml");
        std::fs::write(&path, "[bootstrap.motion]\nspeed_min = 0\n").unwrap();

        let err = HandyConfig::load_from(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
