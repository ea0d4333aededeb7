//! Value-range enforcement for everything that reaches the actuator.
//!
//! Out-of-range input is clamped, never rejected. NaN is the one value that
//! has no natural clamp target; it maps to the safe end of each range.

use handyconf::MotionConfig;

/// Stroke position bounds (0.0 = fully retracted, 1.0 = fully extended).
pub const POSITION_MIN: f64 = 0.0;
pub const POSITION_MAX: f64 = 1.0;

/// Clamp a target position into `[0.0, 1.0]`. NaN becomes 0.0.
pub fn position(value: f64) -> f64 {
    if value.is_nan() {
        return POSITION_MIN;
    }
    value.clamp(POSITION_MIN, POSITION_MAX)
}

/// Speed multiplier bounds, taken from config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedBounds {
    pub min: f64,
    pub max: f64,
}

impl SpeedBounds {
    /// Bounds are stored ordered, whichever way round the config has them.
    pub fn from_config(motion: &MotionConfig) -> Self {
        Self {
            min: motion.speed_min.min(motion.speed_max),
            max: motion.speed_min.max(motion.speed_max),
        }
    }

    /// Clamp a speed multiplier. NaN becomes the slowest speed.
    pub fn clamp(&self, value: f64) -> f64 {
        let (lo, hi) = (self.min.min(self.max), self.min.max(self.max));
        if value.is_nan() {
            return lo;
        }
        value.max(lo).min(hi)
    }
}

impl Default for SpeedBounds {
    fn default() -> Self {
        Self::from_config(&MotionConfig::default())
    }
}

/// Motion timing derived from config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationPolicy {
    pub base_ms: u32,
    pub floor_ms: u32,
    pub ceiling_ms: u32,
}

impl DurationPolicy {
    pub fn from_config(motion: &MotionConfig) -> Self {
        Self {
            base_ms: motion.base_duration_ms,
            floor_ms: motion.min_duration_ms,
            ceiling_ms: motion.max_duration_ms,
        }
    }

    /// Duration for one linear move at the given speed multiplier.
    ///
    /// `requested_ms` replaces the configured base. The result is scaled by
    /// `1 / speed` and always lands in `[floor, max(floor, ceiling)]`.
    pub fn motion_duration(&self, requested_ms: Option<u32>, speed: f64) -> u32 {
        let base = requested_ms.unwrap_or(self.base_ms) as f64;
        let scaled = if speed.is_finite() && speed > 0.0 {
            base / speed
        } else {
            base
        };
        // Truncate like the device API does; f64 → u32 saturates.
        let ms = scaled as u32;
        ms.clamp(self.floor_ms, self.ceiling_ms.max(self.floor_ms))
    }

    /// Duration for the pause retract. Held to the floor, not scaled.
    pub fn retract_duration(&self, configured_ms: u32) -> u32 {
        configured_ms.max(self.floor_ms)
    }
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self::from_config(&MotionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_clamps_both_ends() {
        assert_eq!(position(-0.5), 0.0);
        assert_eq!(position(0.0), 0.0);
        assert_eq!(position(0.42), 0.42);
        assert_eq!(position(1.0), 1.0);
        assert_eq!(position(1.5), 1.0);
        assert_eq!(position(f64::INFINITY), 1.0);
        assert_eq!(position(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn position_nan_retracts() {
        assert_eq!(position(f64::NAN), 0.0);
    }

    #[test]
    fn speed_clamps_to_bounds() {
        let bounds = SpeedBounds::default();
        for (input, expected) in [
            (0.0, 0.25),
            (0.1, 0.25),
            (0.25, 0.25),
            (1.0, 1.0),
            (1.75, 1.75),
            (2.0, 2.0),
            (10.0, 2.0),
            (-3.0, 0.25),
            (f64::NAN, 0.25),
        ] {
            assert_eq!(bounds.clamp(input), expected, "clamp({})", input);
        }
    }

    #[test]
    fn inverted_speed_bounds_do_not_panic() {
        let motion = MotionConfig {
            speed_min: 2.0,
            speed_max: 0.5,
            ..MotionConfig::default()
        };
        let bounds = SpeedBounds::from_config(&motion);
        assert_eq!(bounds, SpeedBounds { min: 0.5, max: 2.0 });
        assert_eq!(bounds.clamp(9.0), 2.0);

        let literal = SpeedBounds { min: 2.0, max: 0.5 };
        assert_eq!(literal.clamp(0.1), 0.5);
        assert_eq!(literal.clamp(1.0), 1.0);
        assert_eq!(literal.clamp(f64::NAN), 0.5);
    }

    #[test]
    fn retract_held_to_floor() {
        let policy = DurationPolicy::default();
        assert_eq!(policy.retract_duration(0), policy.floor_ms);
        assert_eq!(policy.retract_duration(1000), 1000);
    }

    #[test]
    fn duration_scales_with_speed() {
        let policy = DurationPolicy {
            base_ms: 40,
            floor_ms: 25,
            ceiling_ms: 10_000,
        };
        assert_eq!(policy.motion_duration(None, 1.0), 40);
        assert_eq!(policy.motion_duration(None, 0.5), 80);
        assert_eq!(policy.motion_duration(None, 0.25), 160);
        // 40 / 2.0 = 20, below the floor
        assert_eq!(policy.motion_duration(None, 2.0), 25);
    }

    #[test]
    fn duration_never_below_floor() {
        let policy = DurationPolicy::default();
        for speed in [0.25, 0.5, 1.0, 1.5, 2.0] {
            for requested in [None, Some(0), Some(1), Some(10), Some(500)] {
                assert!(policy.motion_duration(requested, speed) >= policy.floor_ms);
            }
        }
    }

    #[test]
    fn requested_duration_replaces_base() {
        let policy = DurationPolicy::default();
        assert_eq!(policy.motion_duration(Some(300), 1.0), 300);
        assert_eq!(policy.motion_duration(Some(300), 2.0), 150);
    }

    #[test]
    fn requested_duration_capped_at_ceiling() {
        let policy = DurationPolicy {
            base_ms: 35,
            floor_ms: 20,
            ceiling_ms: 5000,
        };
        assert_eq!(policy.motion_duration(Some(60_000), 1.0), 5000);
        assert_eq!(policy.motion_duration(Some(u32::MAX), 0.25), 5000);
    }

    #[test]
    fn degenerate_speed_uses_base() {
        let policy = DurationPolicy::default();
        assert_eq!(policy.motion_duration(None, 0.0), policy.base_ms);
        assert_eq!(policy.motion_duration(None, f64::NAN), policy.base_ms);
    }
}
