//! Device and network capability tiering.
//!
//! [`detect`] is a pure function of the sensor readings. The
//! [`CapabilityDetector`] wraps it with the runtime degradation ceiling fed by
//! the performance monitor: the ceiling only ever lowers, so a page never
//! oscillates between tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::performance::PerformanceFeedback;

/// Coarse capability class. Ordered `Low < Mid < High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    Mid,
    High,
}

impl Tier {
    /// One step down, saturating at `Low`.
    pub fn degrade(self) -> Tier {
        match self {
            Tier::High => Tier::Mid,
            Tier::Mid | Tier::Low => Tier::Low,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Mid => "mid",
            Tier::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network effective type as reported by the Network Information API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    /// API unavailable; treated like a fast connection.
    #[serde(rename = "unknown")]
    Unknown,
}

impl ConnectionClass {
    #[inline]
    pub fn is_slow(self) -> bool {
        matches!(self, ConnectionClass::Slow2g | ConnectionClass::TwoG)
    }
}

impl FromStr for ConnectionClass {
    type Err = std::convert::Infallible;

    /// Unrecognised strings map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => ConnectionClass::Slow2g,
            "2g" => ConnectionClass::TwoG,
            "3g" => ConnectionClass::ThreeG,
            "4g" => ConnectionClass::FourG,
            _ => ConnectionClass::Unknown,
        })
    }
}

/// Raw sensor input. Hosts fill this from `navigator` and media queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    pub core_count: u32,
    #[serde(default)]
    pub memory_gb: Option<f32>,
    pub connection: ConnectionClass,
    #[serde(default)]
    pub reduced_motion: bool,
    #[serde(default)]
    pub supports_avif: bool,
    #[serde(default)]
    pub supports_webp: bool,
}

impl Default for SensorReadings {
    fn default() -> Self {
        Self {
            core_count: 4,
            memory_gb: None,
            connection: ConnectionClass::Unknown,
            reduced_motion: false,
            supports_avif: false,
            supports_webp: true,
        }
    }
}

/// Best image encoding the browser can decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Avif,
    Webp,
    Original,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub tier: Tier,
    pub core_count: u32,
    pub memory_gb: Option<f32>,
    pub connection: ConnectionClass,
    pub reduced_motion: bool,
    pub supports_modern_image_formats: bool,
    pub preferred_image_format: ImageFormat,
}

impl Default for CapabilityProfile {
    fn default() -> Self {
        detect(&SensorReadings::default())
    }
}

/// Classify readings. First matching rule wins:
/// reduced motion → low; ≤2 cores, ≤4 GB or 2g-class network → low; 3g → mid; else high.
pub fn detect(readings: &SensorReadings) -> CapabilityProfile {
    let tier = if readings.reduced_motion {
        Tier::Low
    } else if readings.core_count <= 2
        || readings.memory_gb.is_some_and(|gb| gb <= 4.0)
        || readings.connection.is_slow()
    {
        Tier::Low
    } else if readings.connection == ConnectionClass::ThreeG {
        Tier::Mid
    } else {
        Tier::High
    };

    CapabilityProfile {
        tier,
        core_count: readings.core_count,
        memory_gb: readings.memory_gb,
        connection: readings.connection,
        reduced_motion: readings.reduced_motion,
        supports_modern_image_formats: readings.supports_avif || readings.supports_webp,
        preferred_image_format: if readings.supports_avif {
            ImageFormat::Avif
        } else if readings.supports_webp {
            ImageFormat::Webp
        } else {
            ImageFormat::Original
        },
    }
}

/// Sole writer of the page's [`CapabilityProfile`].
#[derive(Clone, Debug)]
pub struct CapabilityDetector {
    readings: SensorReadings,
    ceiling: Option<Tier>,
    profile: CapabilityProfile,
}

impl CapabilityDetector {
    pub fn new(readings: SensorReadings) -> Self {
        let profile = detect(&readings);
        info!(tier = %profile.tier, "capability profile detected");
        Self {
            readings,
            ceiling: None,
            profile,
        }
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    pub fn readings(&self) -> &SensorReadings {
        &self.readings
    }

    /// Lowest tier runtime feedback has allowed so far.
    pub fn ceiling(&self) -> Option<Tier> {
        self.ceiling
    }

    fn recompute(&mut self) -> Option<Tier> {
        let mut next = detect(&self.readings);
        if let Some(ceiling) = self.ceiling {
            next.tier = next.tier.min(ceiling);
        }
        let changed = next.tier != self.profile.tier;
        self.profile = next;
        changed.then_some(self.profile.tier)
    }

    /// Network change event. Returns the new tier when it changed.
    pub fn on_network_change(&mut self, connection: ConnectionClass) -> Option<Tier> {
        self.readings.connection = connection;
        let changed = self.recompute();
        if let Some(tier) = changed {
            info!(?connection, %tier, "capability tier changed after network change");
        }
        changed
    }

    /// `prefers-reduced-motion` changed.
    pub fn on_reduced_motion_change(&mut self, reduced: bool) -> Option<Tier> {
        self.readings.reduced_motion = reduced;
        self.recompute()
    }

    /// Runtime performance feedback: degrade one step, never below `Low`, never back up.
    pub fn apply_feedback(&mut self, feedback: &PerformanceFeedback) -> Option<Tier> {
        let current = self.profile.tier;
        let lowered = current.degrade();
        if lowered == current {
            return None;
        }
        warn!(?feedback, from = %current, to = %lowered, "degrading capability tier");
        self.ceiling = Some(self.ceiling.map_or(lowered, |c| c.min(lowered)));
        self.recompute()
    }
}
