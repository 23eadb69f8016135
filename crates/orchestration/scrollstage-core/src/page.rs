//! The page: owner of every orchestrator component and the single entry point
//! the host drives.
//!
//! Hosts forward browser callbacks (`handle_*`) as they arrive and call
//! [`Page::tick`] once per animation frame. A tick runs, in order:
//!
//! 1. engine initialisation polling, arming sections that were waiting;
//! 2. performance sampling and tier feedback;
//! 3. the scroll synchronizer, then a synchronous geometry refresh if one is
//!    due (or a full rebuild when the viewport class or tier changed);
//! 4. scroll-driven timeline updates and the engine clock;
//! 5. asset visibility;
//! 6. frame assembly (styles, DOM mutations, events, asset requests).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assets::{AssetLoadScheduler, AssetRequest, AssetSpec, FallbackVisual};
use crate::capability::{CapabilityDetector, CapabilityProfile, ConnectionClass, SensorReadings, Tier};
use crate::config::PageConfig;
use crate::context::{AnimationEngineContext, EngineState, TeardownReport};
use crate::engine::AnimationEngine;
use crate::error::{AssetLoadError, PageError, SectionError};
use crate::events::{AnalyticsSink, EventBus, PageEvent};
use crate::geometry::{DomProbe, Viewport, ViewportClass};
use crate::ids::AssetId;
use crate::performance::PerformanceMonitor;
use crate::scroll::{ScrollSynchronizer, SmoothScroller};
use crate::section::{
    ArmEnv, ControllerState, DebugMarker, DomMutation, MutationQueue, SectionAnimationController,
    SectionSpec,
};
use crate::style::StyleWrite;
use crate::trigger::Direction;

/// Per-section error boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum SectionBoundary {
    Healthy,
    /// Rendering its final state after a recoverable problem (missing anchor).
    Degraded,
    /// Arming failed; fallback styles are rendered until `retry_section`.
    Faulted(SectionError),
}

impl SectionBoundary {
    #[inline]
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    Reload,
    NavigateBack,
}

/// Page-level fallback UI description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageFallback {
    pub reason: String,
    pub actions: Vec<FallbackAction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageHealth {
    Running,
    Fatal(PageFallback),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionFault {
    pub section_id: String,
    pub message: String,
}

/// Everything the host must apply after one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageFrame {
    pub epoch: u64,
    pub dt_ms: f64,
    pub scroll_y: f32,
    /// Append order: engine-rendered styles, then static/fallback styles in section order.
    pub styles: Vec<StyleWrite>,
    pub mutations: Vec<DomMutation>,
    pub asset_requests: Vec<AssetRequest>,
    pub events: Vec<PageEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<DebugMarker>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<SectionFault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<PageFallback>,
}

#[derive(Debug)]
struct MountedSection {
    controller: SectionAnimationController,
    boundary: SectionBoundary,
}

pub struct Page<E: AnimationEngine> {
    config: PageConfig,
    context: AnimationEngineContext<E>,
    scroll: ScrollSynchronizer,
    detector: CapabilityDetector,
    assets: AssetLoadScheduler,
    monitor: PerformanceMonitor,
    sections: IndexMap<String, MountedSection>,
    bus: EventBus,
    mutations: MutationQueue,
    viewport: Viewport,
    class: ViewportClass,
    pending_events: Vec<PageEvent>,
    rebuild_requested: bool,
    sync_requested: bool,
    epoch: u64,
    last_tick_ms: Option<f64>,
    health: PageHealth,
    torn_down: bool,
}

impl<E: AnimationEngine> std::fmt::Debug for Page<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("context", &self.context)
            .field("scroll", &self.scroll)
            .field("tier", &self.detector.profile().tier)
            .field("sections", &self.sections.keys().collect::<Vec<_>>())
            .field("viewport", &self.viewport)
            .field("health", &self.health)
            .finish()
    }
}

impl<E: AnimationEngine> Page<E> {
    pub fn new(
        config: PageConfig,
        engine: E,
        readings: SensorReadings,
        viewport: Viewport,
    ) -> Result<Self, PageError> {
        config.validate()?;
        let detector = CapabilityDetector::new(readings);
        let profile = detector.profile().clone();
        let class = config.breakpoints.classify(viewport.width);
        Ok(Self {
            scroll: ScrollSynchronizer::new(&config, None),
            assets: AssetLoadScheduler::new(config.assets, profile),
            monitor: PerformanceMonitor::new(config.performance),
            context: AnimationEngineContext::new(engine),
            detector,
            sections: IndexMap::new(),
            bus: EventBus::new(),
            mutations: MutationQueue::default(),
            viewport,
            class,
            pending_events: Vec::new(),
            rebuild_requested: false,
            sync_requested: true,
            epoch: 0,
            last_tick_ms: None,
            health: PageHealth::Running,
            torn_down: false,
            config,
        })
    }

    /// Attach a smooth scroller. Ignored for reduced motion and the `Low` tier.
    pub fn with_smoother(mut self, smoother: Box<dyn SmoothScroller>) -> Self {
        self.attach_smoother(smoother);
        self
    }

    pub fn attach_smoother(&mut self, smoother: Box<dyn SmoothScroller>) {
        if smoothing_allowed(self.detector.profile()) {
            self.scroll.attach_smoother(smoother);
        } else {
            debug!(tier = %self.detector.profile().tier, "smooth scrolling skipped for this profile");
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AnalyticsSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn AnalyticsSink>) {
        self.bus.add_sink(sink);
    }

    /// Analytics sink failures so far.
    pub fn sink_failures(&self) -> u64 {
        self.bus.failures()
    }

    pub fn config(&self) -> &PageConfig {
        &self.config
    }

    pub fn context(&self) -> &AnimationEngineContext<E> {
        &self.context
    }

    pub fn engine(&self) -> &E {
        self.context.engine()
    }

    pub fn engine_mut(&mut self) -> &mut E {
        self.context.engine_mut()
    }

    pub fn profile(&self) -> &CapabilityProfile {
        self.detector.profile()
    }

    pub fn scroll(&self) -> &ScrollSynchronizer {
        &self.scroll
    }

    pub fn assets(&self) -> &AssetLoadScheduler {
        &self.assets
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn health(&self) -> &PageHealth {
        &self.health
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn viewport_class(&self) -> ViewportClass {
        self.class
    }

    pub fn section_ids(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    pub fn section(&self, id: &str) -> Option<&SectionAnimationController> {
        self.sections.get(id).map(|m| &m.controller)
    }

    pub fn boundary(&self, id: &str) -> Option<&SectionBoundary> {
        self.sections.get(id).map(|m| &m.boundary)
    }

    /// Start loading the animation engine and announce the initial tier.
    pub fn start(&mut self) -> &EngineState {
        self.pending_events.push(PageEvent::CapabilityTier {
            tier: self.detector.profile().tier,
        });
        self.context.begin_init();
        self.context.state()
    }

    /// Mount a section. It arms right away when the engine has settled,
    /// otherwise on the tick that sees it settle.
    pub fn mount_section(&mut self, spec: SectionSpec, dom: &dyn DomProbe) -> Result<(), PageError> {
        self.ensure_running()?;
        spec.validate()?;
        if self.sections.contains_key(&spec.id) {
            return Err(PageError::DuplicateSection { id: spec.id });
        }
        let id = spec.id.clone();
        let controller = SectionAnimationController::new(spec, self.mutations.clone());
        self.sections.insert(
            id.clone(),
            MountedSection {
                controller,
                boundary: SectionBoundary::Healthy,
            },
        );
        if let Some(section) = self.sections.get_mut(&id) {
            let env = ArmEnv {
                dom,
                viewport: self.viewport,
                class: self.class,
                profile: self.detector.profile(),
            };
            arm_section(section, &mut self.context, &env, false);
        }
        self.sync_requested = true;
        debug!(section = %id, "section mounted");
        Ok(())
    }

    /// Unmount a section and tear down everything it registered.
    pub fn unmount_section(&mut self, id: &str) -> Result<TeardownReport, PageError> {
        let mut mounted = self
            .sections
            .shift_remove(id)
            .ok_or_else(|| PageError::UnknownSection { id: id.to_string() })?;
        if mounted.controller.section_state().is_visible {
            self.pending_events.push(PageEvent::SectionLeave {
                section_id: id.to_string(),
            });
        }
        let report = mounted.controller.destroy(&mut self.context);
        debug!(section = %id, invoked = report.invoked, "section unmounted");
        Ok(report)
    }

    /// Rebuild one section from scratch; siblings are untouched.
    pub fn retry_section(&mut self, id: &str, dom: &dyn DomProbe) -> Result<ControllerState, PageError> {
        self.ensure_running()?;
        let section = self
            .sections
            .get_mut(id)
            .ok_or_else(|| PageError::UnknownSection { id: id.to_string() })?;
        section.controller.destroy(&mut self.context);
        let env = ArmEnv {
            dom,
            viewport: self.viewport,
            class: self.class,
            profile: self.detector.profile(),
        };
        arm_section(section, &mut self.context, &env, true);
        self.sync_requested = true;
        match &section.boundary {
            SectionBoundary::Faulted(err) => Err(err.clone().into()),
            _ => Ok(section.controller.state()),
        }
    }

    pub fn handle_scroll(&mut self, y: f32) {
        self.scroll.on_native_scroll(y);
    }

    /// Wheel input; returns the native offset to apply in smooth mode.
    pub fn handle_wheel(&mut self, delta_y: f32) -> Option<f32> {
        self.scroll.on_wheel(delta_y)
    }

    /// Jump to an offset (anchor navigation).
    pub fn scroll_to(&mut self, y: f32) -> f32 {
        self.sync_requested = true;
        self.scroll.scroll_to(y)
    }

    pub fn handle_resize(&mut self, width: f32, height: f32, now_ms: f64) {
        self.set_viewport(width, height);
        self.scroll.on_resize(now_ms);
    }

    pub fn handle_orientation_change(&mut self, width: f32, height: f32, now_ms: f64) {
        self.set_viewport(width, height);
        self.scroll.on_orientation_change(now_ms);
    }

    fn set_viewport(&mut self, width: f32, height: f32) {
        let next = Viewport::new(width, height);
        if next != self.viewport {
            self.viewport = next;
            self.pending_events.push(PageEvent::ViewportResize { width, height });
        }
    }

    /// Document visibility. Hidden pages pause the animation clock.
    pub fn handle_visibility(&mut self, visible: bool) {
        self.context.set_page_visible(visible);
        if !visible {
            self.monitor.reset();
        }
    }

    pub fn handle_network_change(&mut self, connection: ConnectionClass) {
        if let Some(tier) = self.detector.on_network_change(connection) {
            self.apply_tier(tier);
        }
    }

    pub fn handle_reduced_motion_change(&mut self, reduced: bool) {
        let tier = self.detector.on_reduced_motion_change(reduced);
        if let Some(tier) = tier {
            self.apply_tier(tier);
        } else {
            self.assets.set_profile(self.detector.profile().clone());
            self.rebuild_requested = true;
        }
        if reduced {
            self.scroll.disable_smoothing();
        }
    }

    fn apply_tier(&mut self, tier: Tier) {
        info!(%tier, "capability tier changed; rebuilding sections");
        let profile = self.detector.profile().clone();
        if !smoothing_allowed(&profile) {
            self.scroll.disable_smoothing();
        }
        self.assets.set_profile(profile);
        self.pending_events.push(PageEvent::CapabilityTier { tier });
        self.rebuild_requested = true;
    }

    /// A section's subtree height changed; refresh geometry on the next tick.
    pub fn notify_layout_changed(&mut self) {
        self.scroll.request_refresh();
    }

    pub fn register_asset(&mut self, spec: AssetSpec) -> AssetId {
        self.assets.register(spec)
    }

    pub fn asset_loaded(&mut self, id: AssetId) -> Result<(), AssetLoadError> {
        self.assets.mark_loaded(id)
    }

    pub fn asset_failed(&mut self, id: AssetId, error: AssetLoadError) -> Result<(), AssetLoadError> {
        self.assets.mark_errored(id, error)
    }

    pub fn retry_asset(&mut self, id: AssetId) -> Result<(), AssetLoadError> {
        self.assets.retry(id)
    }

    pub fn asset_fallback(&self, id: AssetId) -> Option<FallbackVisual> {
        self.assets.fallback(id)
    }

    fn ensure_running(&self) -> Result<(), PageError> {
        match &self.health {
            PageHealth::Fatal(fallback) => Err(PageError::Fatal {
                reason: fallback.reason.clone(),
            }),
            PageHealth::Running if self.torn_down => Err(PageError::Fatal {
                reason: "page was torn down".to_string(),
            }),
            PageHealth::Running => Ok(()),
        }
    }

    /// Advance one animation frame.
    pub fn tick(&mut self, now_ms: f64, dom: &dyn DomProbe, memory_ratio: Option<f32>) -> PageFrame {
        let dt_ms = self.last_tick_ms.map_or(0.0, |last| (now_ms - last).max(0.0));
        self.last_tick_ms = Some(now_ms);
        self.epoch = self.epoch.wrapping_add(1);

        if let PageHealth::Fatal(fallback) = &self.health {
            return PageFrame {
                epoch: self.epoch,
                dt_ms,
                fatal: Some(fallback.clone()),
                ..PageFrame::default()
            };
        }
        if self.torn_down {
            return PageFrame {
                epoch: self.epoch,
                dt_ms,
                mutations: self.drain_mutations(),
                ..PageFrame::default()
            };
        }

        // 1. Engine readiness.
        if self.context.poll_init() {
            if let Some(caps) = self.context.capabilities() {
                if !caps.has_smoothing {
                    self.scroll.disable_smoothing();
                }
            }
            self.sync_requested = true;
        }

        // 2. Performance feedback.
        if let Some(feedback) = self.monitor.record_frame(now_ms, memory_ratio) {
            if let Some(tier) = self.detector.apply_feedback(&feedback) {
                self.apply_tier(tier);
            }
        }

        // 3. Scroll and geometry.
        self.scroll.set_bounds(dom.document_height(), self.viewport.height);
        let scroll_tick = self.scroll.tick(now_ms);
        let mut retarget: Vec<String> = Vec::new();
        if scroll_tick.refresh_due {
            let class = self.config.breakpoints.classify(self.viewport.width);
            if class != self.class {
                info!(from = ?self.class, to = ?class, "viewport class changed; rebuilding sections");
                self.class = class;
                self.rebuild_requested = true;
            } else {
                for (id, section) in self.sections.iter_mut() {
                    section.controller.refresh(dom, &self.viewport);
                    if section.controller.take_rebuild_request() {
                        retarget.push(id.clone());
                    }
                }
            }
            self.sync_requested = true;
        }

        {
            let env = ArmEnv {
                dom,
                viewport: self.viewport,
                class: self.class,
                profile: self.detector.profile(),
            };
            let rebuild = std::mem::take(&mut self.rebuild_requested);
            for (id, section) in self.sections.iter_mut() {
                if rebuild || retarget.contains(id) {
                    section.controller.destroy(&mut self.context);
                    arm_section(section, &mut self.context, &env, true);
                    self.sync_requested = true;
                } else if section.controller.state() == ControllerState::Idle
                    && !section.boundary.is_faulted()
                {
                    arm_section(section, &mut self.context, &env, false);
                }
            }
        }

        // 4. Timelines.
        let scroll_y = self.scroll.position();
        if let Some(update) = scroll_tick.update {
            self.pending_events.push(update.into());
        }
        if scroll_tick.update.is_some() || std::mem::take(&mut self.sync_requested) {
            let direction = match scroll_tick.update.map_or(1, |u| u.direction) {
                d if d < 0 => Direction::Backward,
                _ => Direction::Forward,
            };
            for (id, section) in self.sections.iter_mut() {
                if let Some(visible) = section.controller.on_scroll(&mut self.context, scroll_y, direction) {
                    self.pending_events.push(if visible {
                        PageEvent::SectionEnter {
                            section_id: id.clone(),
                        }
                    } else {
                        PageEvent::SectionLeave {
                            section_id: id.clone(),
                        }
                    });
                }
            }
        }
        for handle in self.context.advance((dt_ms / 1000.0) as f32) {
            for section in self.sections.values_mut() {
                if section.controller.on_timeline_complete(handle) {
                    break;
                }
            }
        }

        // 5. Assets.
        self.assets.scan_visibility(dom, &self.viewport.rect_at(scroll_y));
        for transition in self.assets.drain_transitions() {
            self.pending_events.push(PageEvent::AssetState {
                url: transition.url,
                state: transition.state,
            });
        }

        // 6. Frame.
        let mut frame = PageFrame {
            epoch: self.epoch,
            dt_ms,
            scroll_y,
            styles: self.context.rendered_styles(),
            mutations: self.drain_mutations(),
            asset_requests: self.assets.drain_requests(),
            ..PageFrame::default()
        };
        for (id, section) in &self.sections {
            match &section.boundary {
                SectionBoundary::Faulted(err) => {
                    frame.styles.extend(section.controller.fallback_styles());
                    frame.faults.push(SectionFault {
                        section_id: id.clone(),
                        message: err.to_string(),
                    });
                }
                _ => frame.styles.extend(section.controller.static_styles()),
            }
            if self.config.debug_markers {
                frame.markers.extend(section.controller.markers());
            }
        }
        frame.events = std::mem::take(&mut self.pending_events);
        self.bus.publish(&frame.events);
        frame
    }

    fn drain_mutations(&mut self) -> Vec<DomMutation> {
        match self.mutations.try_borrow_mut() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => {
                warn!("mutation queue busy; deferring to next frame");
                Vec::new()
            }
        }
    }

    /// Tear down every section, the registry and the scroll synchronizer.
    /// Idempotent; the reverted DOM mutations are returned.
    pub fn teardown(&mut self) -> (TeardownReport, Vec<DomMutation>) {
        let mut report = TeardownReport::default();
        if !self.torn_down {
            self.torn_down = true;
            let ids: Vec<String> = self.sections.keys().rev().cloned().collect();
            for id in ids {
                if let Some(mut section) = self.sections.shift_remove(&id) {
                    report.merge(section.controller.destroy(&mut self.context));
                }
            }
            report.merge(self.context.kill_all());
            self.scroll.destroy();
            info!(invoked = report.invoked, "page torn down");
        }
        (report, self.drain_mutations())
    }

    /// Unrecoverable failure: tear everything down and switch to the page
    /// fallback UI.
    pub fn escalate(&mut self, reason: &str) -> PageError {
        error!(%reason, "page failed; showing fallback");
        self.teardown();
        self.health = PageHealth::Fatal(PageFallback {
            reason: reason.to_string(),
            actions: vec![FallbackAction::Reload, FallbackAction::NavigateBack],
        });
        PageError::Fatal {
            reason: reason.to_string(),
        }
    }
}

fn smoothing_allowed(profile: &CapabilityProfile) -> bool {
    !profile.reduced_motion && profile.tier != Tier::Low
}

/// Arm one section behind its boundary. `reset` clears a previous fault.
fn arm_section<E: AnimationEngine>(
    section: &mut MountedSection,
    ctx: &mut AnimationEngineContext<E>,
    env: &ArmEnv<'_>,
    reset: bool,
) {
    if reset {
        section.boundary = SectionBoundary::Healthy;
    }
    match section.controller.arm(ctx, env) {
        Ok(state) => {
            section.boundary = if state.is_static() && section.controller.degradation().is_some() {
                SectionBoundary::Degraded
            } else {
                SectionBoundary::Healthy
            };
        }
        Err(err) => {
            warn!(section = %section.controller.id(), error = %err, "section failed to arm; rendering fallback");
            section.controller.destroy(ctx);
            section.boundary = SectionBoundary::Faulted(err);
        }
    }
}
