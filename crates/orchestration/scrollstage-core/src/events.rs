//! Page events and the optional analytics sink.
//!
//! Events serialise as `{ "type": "<name>", "detail": { .. } }` with the
//! DOM CustomEvent names hosts already listen for.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::assets::AssetLoadState;
use crate::capability::Tier;
use crate::scroll::ScrollUpdate;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
#[non_exhaustive]
pub enum PageEvent {
    #[serde(rename = "scroll:update")]
    ScrollUpdate {
        progress: f32,
        direction: i8,
        velocity: f32,
    },
    #[serde(rename = "section:enter", rename_all = "camelCase")]
    SectionEnter { section_id: String },
    #[serde(rename = "section:leave", rename_all = "camelCase")]
    SectionLeave { section_id: String },
    #[serde(rename = "viewport:resize")]
    ViewportResize { width: f32, height: f32 },
    #[serde(rename = "capability:tier")]
    CapabilityTier { tier: Tier },
    #[serde(rename = "asset:state")]
    AssetState { url: String, state: AssetLoadState },
}

impl PageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScrollUpdate { .. } => "scroll:update",
            Self::SectionEnter { .. } => "section:enter",
            Self::SectionLeave { .. } => "section:leave",
            Self::ViewportResize { .. } => "viewport:resize",
            Self::CapabilityTier { .. } => "capability:tier",
            Self::AssetState { .. } => "asset:state",
        }
    }
}

impl From<ScrollUpdate> for PageEvent {
    fn from(update: ScrollUpdate) -> Self {
        PageEvent::ScrollUpdate {
            progress: update.progress,
            direction: update.direction,
            velocity: update.velocity,
        }
    }
}

/// Receiver for structured page events. Optional; failures never reach the
/// animation path.
pub trait AnalyticsSink {
    fn track(&mut self, event: &PageEvent) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Box<dyn AnalyticsSink>>,
    failures: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .field("failures", &self.failures)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn AnalyticsSink>) {
        self.sinks.push(sink);
    }

    /// Sink failures seen so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Forward events to every sink. A failing sink is logged and skipped.
    pub fn publish(&mut self, events: &[PageEvent]) {
        for event in events {
            for sink in self.sinks.iter_mut() {
                if let Err(err) = sink.track(event) {
                    self.failures += 1;
                    warn!(event = event.name(), error = %err, "analytics sink failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Flaky {
        seen: Rc<RefCell<Vec<&'static str>>>,
    }

    impl AnalyticsSink for Flaky {
        fn track(&mut self, event: &PageEvent) -> anyhow::Result<()> {
            self.seen.borrow_mut().push(event.name());
            anyhow::ensure!(!matches!(event, PageEvent::SectionEnter { .. }), "beacon rejected");
            Ok(())
        }
    }

    #[test]
    fn wire_names_match_dom_events() {
        let json = serde_json::to_value(PageEvent::SectionEnter {
            section_id: "hero".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "section:enter");
        assert_eq!(json["detail"]["sectionId"], "hero");

        let json = serde_json::to_value(PageEvent::ScrollUpdate {
            progress: 0.5,
            direction: -1,
            velocity: 120.0,
        })
        .unwrap();
        assert_eq!(json["type"], "scroll:update");
        assert_eq!(json["detail"]["direction"], -1);
    }

    #[test]
    fn sink_failures_are_isolated() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.add_sink(Box::new(Flaky { seen: seen.clone() }));
        bus.publish(&[
            PageEvent::SectionEnter {
                section_id: "a".into(),
            },
            PageEvent::ViewportResize {
                width: 375.0,
                height: 812.0,
            },
        ]);
        assert_eq!(*seen.borrow(), vec!["section:enter", "viewport:resize"]);
        assert_eq!(bus.failures(), 1);
    }
}
