//! Configuration for the page orchestrator.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::ViewportClass;

/// Top-level page configuration. Every field has a default so hosts can pass
/// a partial JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Quiet period after the last resize event before geometry is refreshed.
    pub resize_debounce_ms: f64,
    /// Delay after an orientation change so layout can settle.
    pub orientation_delay_ms: f64,
    pub breakpoints: Breakpoints,
    pub smoothing: SmoothingConfig,
    pub assets: AssetPolicy,
    pub performance: PerformanceThresholds,
    /// Development flag: emit a marker record per binding into each frame.
    pub debug_markers: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: 250.0,
            orientation_delay_ms: 500.0,
            breakpoints: Breakpoints::default(),
            smoothing: SmoothingConfig::default(),
            assets: AssetPolicy::default(),
            performance: PerformanceThresholds::default(),
            debug_markers: false,
        }
    }
}

impl PageConfig {
    /// Configuration for known weak devices: native scrolling, tighter FPS budget.
    pub fn low_power() -> Self {
        Self {
            smoothing: SmoothingConfig {
                enabled: false,
                ..SmoothingConfig::default()
            },
            performance: PerformanceThresholds {
                min_fps: 24.0,
                sustained_window_ms: 3000.0,
                ..PerformanceThresholds::default()
            },
            ..Self::default()
        }
    }

    /// Verbose configuration used while developing sections.
    pub fn development() -> Self {
        Self {
            debug_markers: true,
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON configuration and validate it.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError {
                reason: reason.to_string(),
            })
        }

        if !(self.resize_debounce_ms >= 0.0 && self.resize_debounce_ms.is_finite()) {
            return invalid("resize_debounce_ms must be finite and non-negative");
        }
        if !(self.orientation_delay_ms >= 0.0 && self.orientation_delay_ms.is_finite()) {
            return invalid("orientation_delay_ms must be finite and non-negative");
        }
        if self.breakpoints.mobile_max <= 0.0
            || self.breakpoints.tablet_max <= self.breakpoints.mobile_max
        {
            return invalid("breakpoints must satisfy 0 < mobile_max < tablet_max");
        }
        if !(self.smoothing.lerp > 0.0 && self.smoothing.lerp <= 1.0) {
            return invalid("smoothing.lerp must be in (0, 1]");
        }
        if !(0.0..=1.0).contains(&self.assets.intersection_threshold) {
            return invalid("assets.intersection_threshold must be in [0, 1]");
        }
        if self.assets.preload_margin_px < 0.0 {
            return invalid("assets.preload_margin_px must be non-negative");
        }
        if self.performance.min_fps <= 0.0 || self.performance.sustained_window_ms <= 0.0 {
            return invalid("performance thresholds must be positive");
        }
        if self.performance.sample_capacity == 0 {
            return invalid("performance.sample_capacity must be greater than 0");
        }
        Ok(())
    }
}

/// Viewport width breakpoints (inclusive upper bounds, CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Breakpoints {
    pub mobile_max: f32,
    pub tablet_max: f32,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            mobile_max: 767.0,
            tablet_max: 1023.0,
        }
    }
}

impl Breakpoints {
    pub fn classify(&self, width: f32) -> ViewportClass {
        if width <= self.mobile_max {
            ViewportClass::Mobile
        } else if width <= self.tablet_max {
            ViewportClass::Tablet
        } else {
            ViewportClass::Desktop
        }
    }
}

/// Smooth-scroll tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub enabled: bool,
    /// Fraction of the remaining distance covered per 60 Hz frame.
    pub lerp: f32,
    pub wheel_multiplier: f32,
    /// Distance below which the smoothed offset snaps to its target.
    pub settle_epsilon_px: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lerp: 0.1,
            wheel_multiplier: 1.0,
            settle_epsilon_px: 0.5,
        }
    }
}

/// Lazy-loading policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPolicy {
    /// Minimum visible fraction before a lazy asset is requested.
    pub intersection_threshold: f32,
    /// Pre-load margin added around the viewport.
    pub preload_margin_px: f32,
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self {
            intersection_threshold: 0.1,
            preload_margin_px: 50.0,
        }
    }
}

/// Performance degradation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub min_fps: f32,
    /// How long FPS must stay below `min_fps` before the tier is degraded.
    pub sustained_window_ms: f64,
    /// Heap usage ratio that counts as memory pressure.
    pub max_memory_ratio: f32,
    /// Rolling window length in frames.
    pub sample_capacity: usize,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            min_fps: 30.0,
            sustained_window_ms: 2000.0,
            max_memory_ratio: 0.9,
            sample_capacity: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PageConfig::default().validate().is_ok());
        assert!(PageConfig::low_power().validate().is_ok());
        assert!(PageConfig::development().debug_markers);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = PageConfig::from_json(r#"{ "resize_debounce_ms": 100, "smoothing": { "lerp": 0.2 } }"#)
            .expect("partial config parses");
        assert_eq!(cfg.resize_debounce_ms, 100.0);
        assert_eq!(cfg.orientation_delay_ms, 500.0);
        assert_eq!(cfg.smoothing.lerp, 0.2);
        assert!(cfg.smoothing.enabled);
    }

    #[test]
    fn rejects_inverted_breakpoints() {
        let cfg = PageConfig {
            breakpoints: Breakpoints {
                mobile_max: 1200.0,
                tablet_max: 800.0,
            },
            ..PageConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn classify_widths() {
        let bp = Breakpoints::default();
        assert_eq!(bp.classify(375.0), ViewportClass::Mobile);
        assert_eq!(bp.classify(768.0), ViewportClass::Tablet);
        assert_eq!(bp.classify(1920.0), ViewportClass::Desktop);
    }
}
