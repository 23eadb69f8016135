//! Scroll-trigger positions and bindings.
//!
//! Positions use the familiar `"<element edge> <viewport edge>"` notation:
//! `"top 80%"` starts when the element's top reaches 80% down the viewport.
//! Ends may also be relative to the start: `"+=1200"` or `"+=scroll"` (the
//! horizontal scroll amount of a pinned track).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RefreshGeometryError, TriggerParseError};
use crate::geometry::{DomProbe, Viewport};
use crate::ids::HandleId;

/// Reference point along an element or the viewport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Edge {
    Top,
    Center,
    Bottom,
    Percent(f32),
    Pixels(f32),
}

impl Edge {
    fn offset_in(self, length: f32) -> f32 {
        match self {
            Edge::Top => 0.0,
            Edge::Center => length * 0.5,
            Edge::Bottom => length,
            Edge::Percent(p) => length * p / 100.0,
            Edge::Pixels(px) => px,
        }
    }
}

/// An edge plus an optional pixel nudge (`top+=100`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub edge: Edge,
    pub offset_px: f32,
}

impl Anchor {
    pub const fn edge(edge: Edge) -> Self {
        Self {
            edge,
            offset_px: 0.0,
        }
    }

    fn resolve(&self, length: f32) -> f32 {
        self.edge.offset_in(length) + self.offset_px
    }
}

fn parse_number(input: &str, token: &str) -> Result<f32, TriggerParseError> {
    token.parse::<f32>().map_err(|_| TriggerParseError {
        input: input.to_string(),
        reason: format!("'{token}' is not a number"),
    })
}

fn parse_anchor(input: &str, token: &str) -> Result<Anchor, TriggerParseError> {
    let (base, offset_px) = if let Some(i) = token.find("+=") {
        (&token[..i], parse_number(input, &token[i + 2..])?)
    } else if let Some(i) = token.find("-=") {
        (&token[..i], -parse_number(input, &token[i + 2..])?)
    } else {
        (token, 0.0)
    };

    let edge = match base {
        "top" => Edge::Top,
        "center" => Edge::Center,
        "bottom" => Edge::Bottom,
        "" => {
            return Err(TriggerParseError {
                input: input.to_string(),
                reason: "missing edge".to_string(),
            })
        }
        other if other.ends_with('%') => {
            Edge::Percent(parse_number(input, &other[..other.len() - 1])?)
        }
        other if other.ends_with("px") => {
            Edge::Pixels(parse_number(input, &other[..other.len() - 2])?)
        }
        other => Edge::Pixels(parse_number(input, other)?),
    };
    Ok(Anchor { edge, offset_px })
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.edge {
            Edge::Top => write!(f, "top")?,
            Edge::Center => write!(f, "center")?,
            Edge::Bottom => write!(f, "bottom")?,
            Edge::Percent(p) => write!(f, "{p}%")?,
            Edge::Pixels(px) => write!(f, "{px}px")?,
        }
        if self.offset_px > 0.0 {
            write!(f, "+={}", self.offset_px)?;
        } else if self.offset_px < 0.0 {
            write!(f, "-={}", -self.offset_px)?;
        }
        Ok(())
    }
}

/// Where a trigger window starts (or ends, when absolute).
///
/// A single token (`"top"`) pairs the element edge with the viewport top.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TriggerPosition {
    pub element: Anchor,
    pub viewport: Anchor,
}

impl TriggerPosition {
    pub const fn new(element: Edge, viewport: Edge) -> Self {
        Self {
            element: Anchor::edge(element),
            viewport: Anchor::edge(viewport),
        }
    }

    /// Document scroll offset at which this position is reached.
    pub fn scroll_offset(&self, element_top: f32, element_height: f32, viewport: &Viewport) -> f32 {
        element_top + self.element.resolve(element_height) - self.viewport.resolve(viewport.height)
    }
}

impl Default for TriggerPosition {
    /// `"top bottom"`: the element's top meets the viewport bottom.
    fn default() -> Self {
        Self::new(Edge::Top, Edge::Bottom)
    }
}

impl FromStr for TriggerPosition {
    type Err = TriggerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            [element] => Ok(Self {
                element: parse_anchor(s, element)?,
                viewport: Anchor::edge(Edge::Top),
            }),
            [element, viewport] => Ok(Self {
                element: parse_anchor(s, element)?,
                viewport: parse_anchor(s, viewport)?,
            }),
            _ => Err(TriggerParseError {
                input: s.to_string(),
                reason: "expected '<element edge> <viewport edge>'".to_string(),
            }),
        }
    }
}

impl TryFrom<String> for TriggerPosition {
    type Error = TriggerParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for TriggerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.element, self.viewport)
    }
}

impl From<TriggerPosition> for String {
    fn from(value: TriggerPosition) -> Self {
        value.to_string()
    }
}

/// End of a trigger window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EndPosition {
    Absolute(TriggerPosition),
    /// Fixed distance after the start (`"+=1200"`).
    Relative(f32),
    /// Distance equal to the horizontal scroll amount of the binding's track (`"+=scroll"`).
    ScrollAmount,
}

impl Default for EndPosition {
    /// `"bottom top"`: the element's bottom leaves through the viewport top.
    fn default() -> Self {
        EndPosition::Absolute(TriggerPosition::new(Edge::Bottom, Edge::Top))
    }
}

impl FromStr for EndPosition {
    type Err = TriggerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.strip_prefix("+=") {
            Some("scroll") => Ok(EndPosition::ScrollAmount),
            Some(px) => Ok(EndPosition::Relative(parse_number(
                s,
                px.trim_end_matches("px"),
            )?)),
            None => Ok(EndPosition::Absolute(trimmed.parse()?)),
        }
    }
}

impl TryFrom<String> for EndPosition {
    type Error = TriggerParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for EndPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndPosition::Absolute(p) => write!(f, "{p}"),
            EndPosition::Relative(px) => write!(f, "+={px}"),
            EndPosition::ScrollAmount => write!(f, "+=scroll"),
        }
    }
}

impl From<EndPosition> for String {
    fn from(value: EndPosition) -> Self {
        value.to_string()
    }
}

/// How timeline progress follows scroll. JSON: `false`, `true`, or a lag in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScrubRepr", into = "ScrubRepr")]
pub enum ScrubMode {
    /// Timeline plays on its own clock once triggered.
    #[default]
    None,
    /// Progress tracks scroll exactly.
    Bool,
    /// Progress catches up with scroll over this many seconds.
    Lag(f32),
}

impl ScrubMode {
    #[inline]
    pub fn is_scrubbed(&self) -> bool {
        !matches!(self, ScrubMode::None)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum ScrubRepr {
    Flag(bool),
    Lag(f32),
}

impl From<ScrubRepr> for ScrubMode {
    fn from(value: ScrubRepr) -> Self {
        match value {
            ScrubRepr::Flag(false) => ScrubMode::None,
            ScrubRepr::Flag(true) => ScrubMode::Bool,
            ScrubRepr::Lag(l) if l <= 0.0 => ScrubMode::Bool,
            ScrubRepr::Lag(l) => ScrubMode::Lag(l),
        }
    }
}

impl From<ScrubMode> for ScrubRepr {
    fn from(value: ScrubMode) -> Self {
        match value {
            ScrubMode::None => ScrubRepr::Flag(false),
            ScrubMode::Bool => ScrubRepr::Flag(true),
            ScrubMode::Lag(l) => ScrubRepr::Lag(l),
        }
    }
}

/// Scroll direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// `1` for forward (down), `-1` for backward (up).
    #[inline]
    pub fn sign(self) -> i8 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Resolved document offsets of a trigger window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRange {
    pub start_px: f32,
    pub end_px: f32,
}

impl ResolvedRange {
    /// Normalised progress through the window at `scroll_y`.
    pub fn progress_at(&self, scroll_y: f32) -> f32 {
        let span = self.end_px - self.start_px;
        if span <= 0.0 {
            return if scroll_y >= self.start_px { 1.0 } else { 0.0 };
        }
        ((scroll_y - self.start_px) / span).clamp(0.0, 1.0)
    }

    #[inline]
    pub fn contains(&self, scroll_y: f32) -> bool {
        scroll_y >= self.start_px && scroll_y <= self.end_px
    }
}

/// Association between a scroll range and one timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct ScrollTriggerBinding {
    pub name: String,
    pub trigger_selector: String,
    pub start: TriggerPosition,
    pub end: EndPosition,
    pub scrub: ScrubMode,
    pub pinned: bool,
    pub direction_lock: Option<Direction>,
    /// Horizontal distance used by `EndPosition::ScrollAmount`.
    pub scroll_amount: f32,
    pub resolved: Option<ResolvedRange>,
    /// Last refresh failed and `resolved` holds the previous cycle's offsets.
    pub stale: bool,
    pub timeline: Option<HandleId>,
}

impl ScrollTriggerBinding {
    pub fn new(name: &str, trigger_selector: &str, start: TriggerPosition, end: EndPosition) -> Self {
        Self {
            name: name.to_string(),
            trigger_selector: trigger_selector.to_string(),
            start,
            end,
            scrub: ScrubMode::None,
            pinned: false,
            direction_lock: None,
            scroll_amount: 0.0,
            resolved: None,
            stale: false,
            timeline: None,
        }
    }

    /// Recompute pixel offsets from current geometry. On failure the previous
    /// offsets are kept and marked stale until the next refresh.
    pub fn resolve(
        &mut self,
        dom: &dyn DomProbe,
        viewport: &Viewport,
    ) -> Result<ResolvedRange, RefreshGeometryError> {
        let rect = match dom.measure(&self.trigger_selector) {
            Ok(rect) => rect,
            Err(cause) => {
                self.stale = self.resolved.is_some();
                return Err(RefreshGeometryError {
                    binding: self.name.clone(),
                    cause,
                });
            }
        };

        let start_px = self.start.scroll_offset(rect.y, rect.height, viewport);
        let end_px = match self.end {
            EndPosition::Absolute(pos) => pos.scroll_offset(rect.y, rect.height, viewport),
            EndPosition::Relative(px) => start_px + px,
            EndPosition::ScrollAmount => start_px + self.scroll_amount,
        };
        let range = ResolvedRange { start_px, end_px };
        self.resolved = Some(range);
        self.stale = false;
        Ok(range)
    }

    pub fn progress_at(&self, scroll_y: f32) -> Option<f32> {
        self.resolved.map(|r| r.progress_at(scroll_y))
    }

    /// Whether a scroll update in `direction` may drive this binding.
    pub fn accepts(&self, direction: Direction) -> bool {
        self.direction_lock.map_or(true, |lock| lock == direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rect, StaticLayout};

    #[test]
    fn parse_common_positions() {
        let p: TriggerPosition = "top 80%".parse().unwrap();
        assert_eq!(p.element.edge, Edge::Top);
        assert_eq!(p.viewport.edge, Edge::Percent(80.0));

        let p: TriggerPosition = "top+=100 center".parse().unwrap();
        assert_eq!(p.element.offset_px, 100.0);
        assert_eq!(p.viewport.edge, Edge::Center);

        let p: TriggerPosition = "bottom-=20 120px".parse().unwrap();
        assert_eq!(p.element.offset_px, -20.0);
        assert_eq!(p.viewport.edge, Edge::Pixels(120.0));

        assert!("".parse::<TriggerPosition>().is_err());
        assert!("top left right".parse::<TriggerPosition>().is_err());
        assert!("middle 10%".parse::<TriggerPosition>().is_err());
    }

    #[test]
    fn parse_end_positions() {
        assert_eq!("+=1200".parse::<EndPosition>().unwrap(), EndPosition::Relative(1200.0));
        assert_eq!("+=scroll".parse::<EndPosition>().unwrap(), EndPosition::ScrollAmount);
        assert!(matches!(
            "bottom top".parse::<EndPosition>().unwrap(),
            EndPosition::Absolute(_)
        ));
    }

    #[test]
    fn serde_round_trips_strings() {
        let p: TriggerPosition = serde_json::from_str("\"top 80%\"").unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"top 80%\"");
        let s: ScrubMode = serde_json::from_str("1.5").unwrap();
        assert_eq!(s, ScrubMode::Lag(1.5));
        let s: ScrubMode = serde_json::from_str("true").unwrap();
        assert_eq!(s, ScrubMode::Bool);
        let s: ScrubMode = serde_json::from_str("false").unwrap();
        assert_eq!(s, ScrubMode::None);
    }

    #[test]
    fn resolve_against_layout() {
        let layout = StaticLayout::new(5000.0).with_node("#title", Rect::new(0.0, 2000.0, 800.0, 200.0));
        let vp = Viewport::new(1920.0, 1000.0);
        let mut b = ScrollTriggerBinding::new(
            "wipe",
            "#title",
            "top 80%".parse().unwrap(),
            "bottom 20%".parse().unwrap(),
        );
        let r = b.resolve(&layout, &vp).unwrap();
        assert_eq!(r.start_px, 1200.0);
        assert_eq!(r.end_px, 2000.0);
        assert_eq!(b.progress_at(1600.0), Some(0.5));
    }

    #[test]
    fn failed_refresh_keeps_previous_offsets() {
        let mut layout = StaticLayout::new(5000.0).with_node("#t", Rect::new(0.0, 1000.0, 10.0, 10.0));
        let vp = Viewport::new(800.0, 600.0);
        let mut b = ScrollTriggerBinding::new("b", "#t", TriggerPosition::default(), EndPosition::Relative(300.0));
        let first = b.resolve(&layout, &vp).unwrap();
        layout.set_detached("#t", true);
        assert!(b.resolve(&layout, &vp).is_err());
        assert!(b.stale);
        assert_eq!(b.resolved, Some(first));
    }

    #[test]
    fn degenerate_range_steps() {
        let r = ResolvedRange {
            start_px: 100.0,
            end_px: 100.0,
        };
        assert_eq!(r.progress_at(99.0), 0.0);
        assert_eq!(r.progress_at(100.0), 1.0);
    }
}
