//! Visual properties driven by section timelines, plus easing.

use serde::{Deserialize, Serialize};

/// Partial set of animated properties. `None` leaves the property untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
    /// Percent of the element hidden by a clip-path inset (0 = fully revealed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_inset: Option<f32>,
    /// Fraction of split-text fragments shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal: Option<f32>,
}

impl StyleProps {
    pub fn opacity(v: f32) -> Self {
        Self {
            opacity: Some(v),
            ..Self::default()
        }
    }

    pub fn x(v: f32) -> Self {
        Self {
            x: Some(v),
            ..Self::default()
        }
    }

    pub fn clip_inset(v: f32) -> Self {
        Self {
            clip_inset: Some(v),
            ..Self::default()
        }
    }

    pub fn reveal(v: f32) -> Self {
        Self {
            reveal: Some(v),
            ..Self::default()
        }
    }

    /// Interpolate between two partial states. A property present on only one
    /// side is held at that side's value.
    pub fn lerp(from: &StyleProps, to: &StyleProps, t: f32) -> StyleProps {
        fn mix(a: Option<f32>, b: Option<f32>, t: f32) -> Option<f32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a + (b - a) * t),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            }
        }
        StyleProps {
            opacity: mix(from.opacity, to.opacity, t),
            x: mix(from.x, to.x, t),
            y: mix(from.y, to.y, t),
            scale: mix(from.scale, to.scale, t),
            clip_inset: mix(from.clip_inset, to.clip_inset, t),
            reveal: mix(from.reveal, to.reveal, t),
        }
    }
}

/// Fully resolved style for one element.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStyle {
    pub opacity: f32,
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub clip_inset: f32,
    pub reveal: f32,
}

impl Default for ResolvedStyle {
    /// The final, at-rest visual state: everything visible, nothing clipped or offset.
    fn default() -> Self {
        Self {
            opacity: 1.0,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            clip_inset: 0.0,
            reveal: 1.0,
        }
    }
}

impl ResolvedStyle {
    pub fn apply(&mut self, props: &StyleProps) {
        if let Some(v) = props.opacity {
            self.opacity = v;
        }
        if let Some(v) = props.x {
            self.x = v;
        }
        if let Some(v) = props.y {
            self.y = v;
        }
        if let Some(v) = props.scale {
            self.scale = v;
        }
        if let Some(v) = props.clip_inset {
            self.clip_inset = v;
        }
        if let Some(v) = props.reveal {
            self.reveal = v;
        }
    }

    /// Element is fully visible: opaque, unclipped, all text fragments shown.
    pub fn is_fully_visible(&self) -> bool {
        self.opacity >= 1.0 && self.clip_inset <= 0.0 && self.reveal >= 1.0
    }
}

/// A resolved style destined for one selector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StyleWrite {
    pub selector: String,
    pub style: ResolvedStyle,
}

/// Easing curves (GSAP naming).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ease {
    #[default]
    Linear,
    Power2Out,
    Power3Out,
    Power2InOut,
    ExpoOut,
}

impl Ease {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Ease::Linear => t,
            Ease::Power2Out => 1.0 - (1.0 - t).powi(3),
            Ease::Power3Out => 1.0 - (1.0 - t).powi(4),
            Ease::Power2InOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Ease::ExpoOut => {
                if t >= 1.0 {
                    1.0
                } else {
                    1.0 - 2f32.powf(-10.0 * t)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eases_hit_endpoints() {
        for ease in [
            Ease::Linear,
            Ease::Power2Out,
            Ease::Power3Out,
            Ease::Power2InOut,
            Ease::ExpoOut,
        ] {
            assert!(ease.apply(0.0).abs() < 1e-6, "{ease:?}");
            assert!((ease.apply(1.0) - 1.0).abs() < 1e-6, "{ease:?}");
        }
    }

    #[test]
    fn lerp_holds_one_sided_props() {
        let from = StyleProps {
            opacity: Some(0.0),
            x: Some(40.0),
            ..StyleProps::default()
        };
        let to = StyleProps::opacity(1.0);
        let mid = StyleProps::lerp(&from, &to, 0.5);
        assert_eq!(mid.opacity, Some(0.5));
        assert_eq!(mid.x, Some(40.0));
        assert_eq!(mid.clip_inset, None);
    }

    #[test]
    fn default_style_is_final_state() {
        assert!(ResolvedStyle::default().is_fully_visible());
        let mut s = ResolvedStyle::default();
        s.apply(&StyleProps::clip_inset(100.0));
        assert!(!s.is_fully_visible());
    }
}
