//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, HandyConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/handyd/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("handyd/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("handyd.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a TOML file and layer it over `base`.
pub fn load_from_file(base: HandyConfig, path: &Path) -> Result<HandyConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(base, &contents, path)
}

/// Parse TOML and apply every key it sets on top of `base`.
///
/// Keys the file does not mention keep the value from `base`, so files can
/// be stacked system → user → local.
pub(crate) fn parse_toml(
    mut config: HandyConfig,
    contents: &str,
    path: &Path,
) -> Result<HandyConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let bad = |key: &str, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must be {}", key, expected),
    };
    let u64_at = |key: &str, v: &toml::Value| {
        as_u64(v).ok_or_else(|| bad(key, "a non-negative integer"))
    };
    let u32_at = |key: &str, v: &toml::Value| as_u32(v).ok_or_else(|| bad(key, "a u32"));
    let f64_at = |key: &str, v: &toml::Value| as_f64(v).ok_or_else(|| bad(key, "a number"));

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("host") {
            let host = v.as_str().ok_or_else(|| bad("bind.host", "a string"))?;
            config.infra.bind.host = host.to_string();
        }
        if let Some(v) = bind.get("http_port") {
            let port = v.as_integer().ok_or_else(|| bad("bind.http_port", "an integer"))?;
            config.infra.bind.http_port =
                u16::try_from(port).map_err(|_| bad("bind.http_port", "a valid port"))?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    if let Some(hub) = table.get("hub").and_then(|v| v.as_table()) {
        if let Some(v) = hub.get("endpoints") {
            let endpoints = v.as_array().ok_or_else(|| bad("hub.endpoints", "an array"))?;
            config.infra.hub.endpoints = endpoints
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = hub.get("client_name").and_then(|v| v.as_str()) {
            config.infra.hub.client_name = v.to_string();
        }
        if let Some(v) = hub.get("connect_timeout_ms") {
            config.infra.hub.connect_timeout_ms = u64_at("hub.connect_timeout_ms", v)?;
        }
        if let Some(v) = hub.get("request_timeout_ms") {
            config.infra.hub.request_timeout_ms = u64_at("hub.request_timeout_ms", v)?;
        }
        if let Some(v) = hub.get("shutdown_timeout_ms") {
            config.infra.hub.shutdown_timeout_ms = u64_at("hub.shutdown_timeout_ms", v)?;
        }
    }

    if let Some(bootstrap) = table.get("bootstrap").and_then(|v| v.as_table()) {
        if let Some(motion) = bootstrap.get("motion").and_then(|v| v.as_table()) {
            let m = &mut config.bootstrap.motion;
            if let Some(v) = motion.get("base_duration_ms") {
                m.base_duration_ms = u32_at("motion.base_duration_ms", v)?;
            }
            if let Some(v) = motion.get("min_duration_ms") {
                m.min_duration_ms = u32_at("motion.min_duration_ms", v)?;
            }
            if let Some(v) = motion.get("max_duration_ms") {
                m.max_duration_ms = u32_at("motion.max_duration_ms", v)?;
            }
            if let Some(v) = motion.get("retract_duration_ms") {
                m.retract_duration_ms = u32_at("motion.retract_duration_ms", v)?;
            }
            if let Some(v) = motion.get("speed_min") {
                m.speed_min = f64_at("motion.speed_min", v)?;
            }
            if let Some(v) = motion.get("speed_max") {
                m.speed_max = f64_at("motion.speed_max", v)?;
            }
            if let Some(v) = motion.get("initial_speed") {
                m.initial_speed = f64_at("motion.initial_speed", v)?;
            }
        }

        if let Some(scan) = bootstrap.get("scan").and_then(|v| v.as_table()) {
            if let Some(v) = scan.get("window_ms") {
                config.bootstrap.scan.window_ms = u64_at("scan.window_ms", v)?;
            }
            if let Some(v) = scan.get("auto_connect") {
                let auto = v.as_bool().ok_or_else(|| bad("scan.auto_connect", "a boolean"))?;
                config.bootstrap.scan.auto_connect = auto;
            }
        }
    }

    Ok(config)
}

fn as_u64(v: &toml::Value) -> Option<u64> {
    v.as_integer().and_then(|i| u64::try_from(i).ok())
}

fn as_u32(v: &toml::Value) -> Option<u32> {
    v.as_integer().and_then(|i| u32::try_from(i).ok())
}

/// TOML distinguishes `2` from `2.0`; accept both for float settings.
fn as_f64(v: &toml::Value) -> Option<f64> {
    v.as_float().or_else(|| v.as_integer().map(|i| i as f64))
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut HandyConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit set of variables.
///
/// Unparseable numeric values are ignored rather than failing the load.
pub fn apply_overrides_from<I>(config: &mut HandyConfig, sources: &mut ConfigSources, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let applied = match key.as_str() {
            "HANDYD_HOST" => {
                config.infra.bind.host = value;
                true
            }
            "HANDYD_HTTP_PORT" => value
                .parse()
                .map(|port| config.infra.bind.http_port = port)
                .is_ok(),
            "HANDYD_HUB_ENDPOINTS" => {
                config.infra.hub.endpoints = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                true
            }
            "HANDYD_OTLP_ENDPOINT" | "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                config.infra.telemetry.otlp_endpoint = value;
                true
            }
            "HANDYD_LOG_LEVEL" | "RUST_LOG" => {
                config.infra.telemetry.log_level = value;
                true
            }
            "HANDYD_SCAN_WINDOW_MS" => value
                .parse()
                .map(|ms| config.bootstrap.scan.window_ms = ms)
                .is_ok(),
            "HANDYD_BASE_DURATION_MS" => value
                .parse()
                .map(|ms| config.bootstrap.motion.base_duration_ms = ms)
                .is_ok(),
            "HANDYD_MIN_DURATION_MS" => value
                .parse()
                .map(|ms| config.bootstrap.motion.min_duration_ms = ms)
                .is_ok(),
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
}
