//! Bootstrap configuration - seeds runtime state, then the session owns it.

use serde::{Deserialize, Serialize};

/// Motion timing and clamp bounds.
///
/// Every linear-motion command the daemon sends is derived from these:
/// `duration = clamp(base / speed, min_duration_ms, max_duration_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Nominal stroke duration at speed 1.0.
    #[serde(default = "MotionConfig::default_base_duration_ms")]
    pub base_duration_ms: u32,

    /// Device-protection floor. Nothing shorter is ever sent.
    #[serde(default = "MotionConfig::default_min_duration_ms")]
    pub min_duration_ms: u32,

    /// Ceiling for caller-requested durations.
    #[serde(default = "MotionConfig::default_max_duration_ms")]
    pub max_duration_ms: u32,

    /// Duration of the retract-to-zero move issued on pause.
    #[serde(default = "MotionConfig::default_retract_duration_ms")]
    pub retract_duration_ms: u32,

    #[serde(default = "MotionConfig::default_speed_min")]
    pub speed_min: f64,

    #[serde(default = "MotionConfig::default_speed_max")]
    pub speed_max: f64,

    /// Speed multiplier at startup (clamped into bounds).
    #[serde(default = "MotionConfig::default_initial_speed")]
    pub initial_speed: f64,
}

impl MotionConfig {
    fn default_base_duration_ms() -> u32 {
        35
    }

    fn default_min_duration_ms() -> u32 {
        20
    }

    fn default_max_duration_ms() -> u32 {
        10_000
    }

    fn default_retract_duration_ms() -> u32 {
        1000
    }

    fn default_speed_min() -> f64 {
        0.25
    }

    fn default_speed_max() -> f64 {
        2.0
    }

    fn default_initial_speed() -> f64 {
        1.0
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            base_duration_ms: Self::default_base_duration_ms(),
            min_duration_ms: Self::default_min_duration_ms(),
            max_duration_ms: Self::default_max_duration_ms(),
            retract_duration_ms: Self::default_retract_duration_ms(),
            speed_min: Self::default_speed_min(),
            speed_max: Self::default_speed_max(),
            initial_speed: Self::default_initial_speed(),
        }
    }
}

/// Device discovery behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Length of the discovery window opened by `connect`.
    #[serde(default = "ScanConfig::default_window_ms")]
    pub window_ms: u64,

    /// Connect to the hub on startup instead of waiting for `/connect`.
    #[serde(default)]
    pub auto_connect: bool,
}

impl ScanConfig {
    fn default_window_ms() -> u64 {
        2000
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_ms: Self::default_window_ms(),
            auto_connect: false,
        }
    }
}

/// Complete bootstrap configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub scan: ScanConfig,
}
