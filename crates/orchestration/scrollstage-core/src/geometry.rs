//! Document geometry and the DOM probe contract.
//!
//! All rectangles are in document coordinates (CSS pixels, origin at the top
//! of the page), so they do not move when the page scrolls.

use hashbrown::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f32) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }
}

/// Browser viewport size.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// The visible document rectangle at a given scroll offset.
    pub fn rect_at(&self, scroll_y: f32) -> Rect {
        Rect::new(0.0, scroll_y, self.width, self.height)
    }
}

/// Responsive size class. Crossing a class boundary rebuilds every section.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewportClass {
    Mobile,
    Tablet,
    Desktop,
}

/// Fraction of `element` inside the viewport grown by `margin` (IntersectionObserver semantics
/// with a `rootMargin`).
pub fn visible_ratio(element: &Rect, viewport: &Rect, margin: f32) -> f32 {
    let area = element.area();
    if area <= 0.0 {
        // Zero-size elements count as visible once their origin is inside the root.
        let root = viewport.expand(margin);
        let inside = element.y >= root.y && element.y <= root.bottom();
        return if inside { 1.0 } else { 0.0 };
    }
    (element.intersection_area(&viewport.expand(margin)) / area).clamp(0.0, 1.0)
}

/// Read-only view of the host document.
///
/// Hosts (the wasm adapter, tests) implement this and pass it into the page on
/// every call that needs geometry. The orchestrator never holds on to it.
pub trait DomProbe {
    /// Document-space bounding box of the first element matching `selector`.
    fn measure(&self, selector: &str) -> Result<Rect, MeasureError>;

    /// Whether an element matching `selector` is present, attached or not.
    fn exists(&self, selector: &str) -> bool;

    /// Text content, used for character/word splitting.
    fn text(&self, selector: &str) -> Option<String>;

    /// Full scrollable content width (horizontal tracks).
    fn scroll_width(&self, selector: &str) -> Result<f32, MeasureError> {
        self.measure(selector).map(|r| r.width)
    }

    /// Total document height.
    fn document_height(&self) -> f32;
}

/// One element in a [`StaticLayout`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutNode {
    pub rect: Rect,
    pub text: Option<String>,
    pub scroll_width: Option<f32>,
    pub detached: bool,
}

/// Snapshot layout: a selector → node table. Used by hosts that measure the
/// DOM once per frame and by tests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticLayout {
    pub document_height: f32,
    pub nodes: HashMap<String, LayoutNode>,
}

impl StaticLayout {
    pub fn new(document_height: f32) -> Self {
        Self {
            document_height,
            nodes: HashMap::new(),
        }
    }

    pub fn with_node(mut self, selector: &str, rect: Rect) -> Self {
        self.set_rect(selector, rect);
        self
    }

    pub fn with_text(mut self, selector: &str, rect: Rect, text: &str) -> Self {
        let node = self.nodes.entry(selector.to_string()).or_default();
        node.rect = rect;
        node.text = Some(text.to_string());
        self
    }

    pub fn with_scroll_width(mut self, selector: &str, rect: Rect, scroll_width: f32) -> Self {
        let node = self.nodes.entry(selector.to_string()).or_default();
        node.rect = rect;
        node.scroll_width = Some(scroll_width);
        self
    }

    pub fn set_rect(&mut self, selector: &str, rect: Rect) {
        self.nodes.entry(selector.to_string()).or_default().rect = rect;
    }

    pub fn set_detached(&mut self, selector: &str, detached: bool) {
        if let Some(node) = self.nodes.get_mut(selector) {
            node.detached = detached;
        }
    }

    pub fn remove(&mut self, selector: &str) -> Option<LayoutNode> {
        self.nodes.remove(selector)
    }
}

impl DomProbe for StaticLayout {
    fn measure(&self, selector: &str) -> Result<Rect, MeasureError> {
        match self.nodes.get(selector) {
            None => Err(MeasureError::NotFound {
                selector: selector.to_string(),
            }),
            Some(node) if node.detached => Err(MeasureError::Detached {
                selector: selector.to_string(),
            }),
            Some(node) => Ok(node.rect),
        }
    }

    fn exists(&self, selector: &str) -> bool {
        self.nodes.contains_key(selector)
    }

    fn text(&self, selector: &str) -> Option<String> {
        self.nodes.get(selector).and_then(|n| n.text.clone())
    }

    fn scroll_width(&self, selector: &str) -> Result<f32, MeasureError> {
        let rect = self.measure(selector)?;
        Ok(self
            .nodes
            .get(selector)
            .and_then(|n| n.scroll_width)
            .unwrap_or(rect.width))
    }

    fn document_height(&self) -> f32 {
        self.document_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_with_margin() {
        let viewport = Viewport::new(1000.0, 800.0).rect_at(0.0);
        // 100px tall element starting 40px below the fold: only the margin catches it.
        let el = Rect::new(0.0, 840.0, 100.0, 100.0);
        assert_eq!(visible_ratio(&el, &viewport, 0.0), 0.0);
        let r = visible_ratio(&el, &viewport, 50.0);
        assert!((r - 0.1).abs() < 1e-4, "ratio {r}");
    }

    #[test]
    fn detached_nodes_fail_measurement() {
        let mut layout = StaticLayout::new(2000.0).with_node("#a", Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(layout.measure("#a").is_ok());
        layout.set_detached("#a", true);
        assert!(matches!(layout.measure("#a"), Err(MeasureError::Detached { .. })));
        assert!(layout.exists("#a"));
        assert!(matches!(layout.measure("#b"), Err(MeasureError::NotFound { .. })));
    }

    #[test]
    fn scroll_width_falls_back_to_rect() {
        let layout = StaticLayout::new(100.0)
            .with_node("#plain", Rect::new(0.0, 0.0, 300.0, 10.0))
            .with_scroll_width("#track", Rect::new(0.0, 0.0, 1920.0, 600.0), 5000.0);
        assert_eq!(layout.scroll_width("#plain").unwrap(), 300.0);
        assert_eq!(layout.scroll_width("#track").unwrap(), 5000.0);
    }

    #[test]
    fn layout_snapshot_parses_from_json() {
        let layout: StaticLayout = serde_json::from_str(
            r##"{
                "document_height": 3000,
                "nodes": {
                    "#hero": { "rect": { "x": 0, "y": 0, "width": 1440, "height": 900 } },
                    "#hero h1": { "rect": { "x": 80, "y": 300, "width": 800, "height": 90 }, "text": "Hello" }
                }
            }"##,
        )
        .unwrap();
        assert_eq!(layout.nodes.len(), 2);
        assert_eq!(layout.document_height(), 3000.0);
        assert_eq!(layout.measure("#hero").unwrap().bottom(), 900.0);
        assert_eq!(layout.text("#hero h1").as_deref(), Some("Hello"));
    }
}
