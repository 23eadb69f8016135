//! Generic per-section animation controller.
//!
//! Every section on the page is described by a declarative [`SectionSpec`]
//! (anchors plus binding descriptors). One controller type interprets any
//! spec:
//!
//! ```text
//! Idle ──arm──▶ Armed(Animated | Static) ──enter──▶ Playing ──complete──▶ Settled
//!   ▲               │
//!   └──destroy──────┘
//! ```
//!
//! All timelines and DOM side effects a build creates live under one
//! [`ScopeId`]. Destroying the controller kills that scope; a rebuild opens a
//! fresh one.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::{CapabilityProfile, Tier};
use crate::context::{AnimationEngineContext, EngineState, TeardownReport};
use crate::engine::{AnimationEngine, SplitRequest, TimelineSpec, TimelineStep};
use crate::error::{AnchorMissingError, RefreshGeometryError, SectionError};
use crate::geometry::{DomProbe, Viewport, ViewportClass};
use crate::ids::{HandleId, ScopeId};
use crate::registry::cleanup;
use crate::style::{Ease, ResolvedStyle, StyleProps, StyleWrite};
use crate::text::{split_text, SplitMode, TextFragment};
use crate::trigger::{
    Direction, Edge, EndPosition, ResolvedRange, ScrollTriggerBinding, ScrubMode, TriggerPosition,
};

/// DOM side effects the host applies on the orchestrator's behalf.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DomMutation {
    /// Pin `selector` and insert a spacer of `spacer_px` after it. A second
    /// `Pin` for an already pinned selector resizes its spacer.
    Pin { selector: String, spacer_px: f32 },
    Unpin { selector: String },
    SplitText {
        selector: String,
        mode: SplitMode,
        fragments: Vec<TextFragment>,
    },
    RevertSplit { selector: String },
}

/// Shared queue of pending DOM mutations, drained once per frame.
pub type MutationQueue = Rc<RefCell<Vec<DomMutation>>>;

fn push_mutation(queue: &MutationQueue, mutation: DomMutation) -> anyhow::Result<()> {
    queue
        .try_borrow_mut()
        .map_err(|_| anyhow::anyhow!("mutation queue is already borrowed"))?
        .push(mutation);
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorSpec {
    pub selector: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

fn default_duration() -> f32 {
    1.0
}

/// What a binding animates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BindingKind {
    /// One-shot clock animation played when the window is entered.
    Entrance,
    /// Steps mapped directly onto scroll progress.
    Scrub,
    /// Pin the section root and slide `track` left by its overflow.
    HorizontalScroll { track: String },
    /// Split `target` into fragments and reveal them.
    TextReveal {
        target: String,
        #[serde(default = "default_split")]
        split: SplitMode,
    },
    /// Clip-path wipe revealing `target`.
    ClipWipe { target: String },
}

fn default_split() -> SplitMode {
    SplitMode::Chars
}

/// Declarative description of one scroll binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: BindingKind,
    /// Trigger element; defaults to the section root.
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub start: Option<TriggerPosition>,
    #[serde(default)]
    pub end: Option<EndPosition>,
    #[serde(default)]
    pub scrub: ScrubMode,
    #[serde(default)]
    pub pin: bool,
    #[serde(default)]
    pub direction_lock: Option<Direction>,
    #[serde(default)]
    pub steps: Vec<TimelineStep>,
    /// Viewport classes this binding exists in; `None` means all.
    #[serde(default)]
    pub breakpoints: Option<Vec<ViewportClass>>,
    /// Replay on every entry instead of once per page lifetime.
    #[serde(default)]
    pub repeatable: bool,
    /// Lowest capability tier that still gets this animation.
    #[serde(default)]
    pub min_tier: Option<Tier>,
    #[serde(default = "default_duration")]
    pub duration_s: f32,
}

impl BindingSpec {
    pub fn new(name: &str, kind: BindingKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            trigger: None,
            start: None,
            end: None,
            scrub: ScrubMode::None,
            pin: false,
            direction_lock: None,
            steps: Vec::new(),
            breakpoints: None,
            repeatable: false,
            min_tier: None,
            duration_s: default_duration(),
        }
    }

    pub fn applies_to(&self, class: ViewportClass, tier: Tier) -> bool {
        let class_ok = self
            .breakpoints
            .as_ref()
            .map_or(true, |classes| classes.contains(&class));
        class_ok && self.min_tier.map_or(true, |min| tier >= min)
    }

    fn effective_scrub(&self) -> ScrubMode {
        match (&self.kind, self.scrub) {
            (BindingKind::Entrance, _) => ScrubMode::None,
            (BindingKind::Scrub | BindingKind::HorizontalScroll { .. }, ScrubMode::None) => ScrubMode::Bool,
            (_, scrub) => scrub,
        }
    }

    fn effective_start(&self) -> TriggerPosition {
        self.start.unwrap_or(match self.kind {
            BindingKind::HorizontalScroll { .. } => TriggerPosition::new(Edge::Top, Edge::Top),
            _ => TriggerPosition::new(Edge::Top, Edge::Percent(80.0)),
        })
    }

    fn effective_end(&self) -> EndPosition {
        self.end.unwrap_or(match self.kind {
            BindingKind::HorizontalScroll { .. } => EndPosition::ScrollAmount,
            _ => EndPosition::default(),
        })
    }

    /// Every element this binding writes styles to.
    pub fn targets(&self, root: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut add = |s: &str| {
            if !out.iter().any(|t| t == s) {
                out.push(s.to_string());
            }
        };
        match &self.kind {
            BindingKind::HorizontalScroll { track } => add(track),
            BindingKind::TextReveal { target, .. } | BindingKind::ClipWipe { target } => add(target),
            BindingKind::Entrance | BindingKind::Scrub => {
                if self.steps.is_empty() {
                    add(root);
                }
            }
        }
        for step in &self.steps {
            add(&step.target);
        }
        out
    }
}

/// Declarative section description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub id: String,
    pub root: String,
    #[serde(default)]
    pub anchors: Vec<AnchorSpec>,
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

impl SectionSpec {
    pub fn new(id: &str, root: &str) -> Self {
        Self {
            id: id.to_string(),
            root: root.to_string(),
            anchors: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn with_anchor(mut self, selector: &str) -> Self {
        self.anchors.push(AnchorSpec {
            selector: selector.to_string(),
            required: true,
        });
        self
    }

    pub fn with_binding(mut self, binding: BindingSpec) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), SectionError> {
        let invalid = |reason: String| SectionError::InvalidSpec {
            section_id: self.id.clone(),
            reason,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("section id is empty".into()));
        }
        if self.root.trim().is_empty() {
            return Err(invalid("root selector is empty".into()));
        }
        let mut names = HashSet::new();
        for binding in &self.bindings {
            if !names.insert(binding.name.as_str()) {
                return Err(invalid(format!("duplicate binding '{}'", binding.name)));
            }
            if !(binding.duration_s > 0.0 && binding.duration_s.is_finite()) {
                return Err(invalid(format!("binding '{}' has a non-positive duration", binding.name)));
            }
            if binding.steps.iter().any(|s| s.span < 0.0 || s.at < 0.0) {
                return Err(invalid(format!("binding '{}' has a negative step position", binding.name)));
            }
            if matches!(binding.kind, BindingKind::Entrance) && binding.scrub.is_scrubbed() {
                return Err(invalid(format!("entrance binding '{}' cannot be scrubbed", binding.name)));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmMode {
    Animated,
    Static,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "mode", rename_all = "lowercase")]
pub enum ControllerState {
    Idle,
    Armed(ArmMode),
    Playing,
    Settled,
}

impl ControllerState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Armed(ArmMode::Animated) => "armed",
            Self::Armed(ArmMode::Static) => "armed-static",
            Self::Playing => "playing",
            Self::Settled => "settled",
        }
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Armed(ArmMode::Static))
    }
}

/// Per-section runtime state. `has_animated` never goes back to `false`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionState {
    pub section_id: String,
    pub is_visible: bool,
    pub has_animated: bool,
    pub progress: f32,
}

/// Inputs to arming and rebuilding.
pub struct ArmEnv<'a> {
    pub dom: &'a dyn DomProbe,
    pub viewport: Viewport,
    pub class: ViewportClass,
    pub profile: &'a CapabilityProfile,
}

/// Development marker for one binding window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugMarker {
    pub section_id: String,
    pub binding: String,
    pub start_px: f32,
    pub end_px: f32,
    pub stale: bool,
}

#[derive(Debug)]
struct ActiveBinding {
    spec_index: usize,
    trigger: ScrollTriggerBinding,
    track: Option<String>,
    /// Spacer last queued for the pinned root.
    pin_spacer: Option<f32>,
    played: bool,
    complete: bool,
}

#[derive(Debug)]
pub struct SectionAnimationController {
    spec: SectionSpec,
    state: ControllerState,
    section: SectionState,
    scope: Option<ScopeId>,
    bindings: Vec<ActiveBinding>,
    root_range: Option<ResolvedRange>,
    static_targets: Vec<String>,
    logged_missing: HashSet<String>,
    degradation: Option<SectionError>,
    mutations: MutationQueue,
    builds: u32,
    /// A horizontal track changed length; its timeline needs rebuilding.
    retarget: bool,
}

impl SectionAnimationController {
    pub fn new(spec: SectionSpec, mutations: MutationQueue) -> Self {
        let section = SectionState {
            section_id: spec.id.clone(),
            is_visible: false,
            has_animated: false,
            progress: 0.0,
        };
        Self {
            spec,
            state: ControllerState::Idle,
            section,
            scope: None,
            bindings: Vec::new(),
            root_range: None,
            static_targets: Vec::new(),
            logged_missing: HashSet::new(),
            degradation: None,
            mutations,
            builds: 0,
            retarget: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &SectionSpec {
        &self.spec
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn section_state(&self) -> &SectionState {
        &self.section
    }

    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    /// Number of completed arm passes that opened a scope.
    pub fn builds(&self) -> u32 {
        self.builds
    }

    /// Why the section is rendering statically, when it degraded on a fault.
    pub fn degradation(&self) -> Option<&SectionError> {
        self.degradation.as_ref()
    }

    pub fn binding_names(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .map(|b| b.trigger.name.as_str())
            .collect()
    }

    pub fn binding(&self, name: &str) -> Option<&ScrollTriggerBinding> {
        self.bindings
            .iter()
            .find(|b| b.trigger.name == name)
            .map(|b| &b.trigger)
    }

    pub fn timeline_handles(&self) -> Vec<HandleId> {
        self.bindings.iter().filter_map(|b| b.trigger.timeline).collect()
    }

    /// Build bindings and timelines.
    ///
    /// Stays `Idle` while the engine is still loading. A failed engine, a
    /// missing required anchor, or reduced motion arms `Static`.
    pub fn arm<E: AnimationEngine>(
        &mut self,
        ctx: &mut AnimationEngineContext<E>,
        env: &ArmEnv<'_>,
    ) -> Result<ControllerState, SectionError> {
        if self.state != ControllerState::Idle {
            return Ok(self.state);
        }
        match ctx.state() {
            EngineState::Uninitialized | EngineState::Loading => return Ok(self.state),
            EngineState::Failed(_) => {
                // Static page, but enter/leave events still fire.
                match env.dom.measure(&self.spec.root) {
                    Ok(root) => self.root_range = Some(root_window(root.y, root.height, &env.viewport)),
                    Err(cause) => {
                        debug!(section = %self.spec.id, error = %cause, "section root not measurable; no visibility events");
                    }
                }
                return Ok(self.arm_static(None));
            }
            EngineState::Ready(_) => {}
        }

        let root = env
            .dom
            .measure(&self.spec.root)
            .map_err(|cause| SectionError::RootGeometry {
                section_id: self.spec.id.clone(),
                cause,
            })?;
        self.root_range = Some(root_window(root.y, root.height, &env.viewport));

        if let Some(missing) = self.first_missing_anchor(env.dom) {
            return Ok(self.arm_static(Some(missing.into())));
        }
        if env.profile.reduced_motion {
            debug!(section = %self.spec.id, "reduced motion; rendering final state");
            return Ok(self.arm_static(None));
        }

        let scope = ctx.open_scope();
        self.scope = Some(scope);
        self.builds += 1;
        self.static_targets.clear();

        for index in 0..self.spec.bindings.len() {
            let spec = self.spec.bindings[index].clone();
            if !spec.applies_to(env.class, env.profile.tier) {
                debug!(section = %self.spec.id, binding = %spec.name, class = ?env.class, "binding not built for this viewport/tier");
                self.add_static_targets(&spec);
                continue;
            }
            match self.build_binding(ctx, env, scope, index, &spec) {
                Some(active) => self.bindings.push(active),
                None => self.add_static_targets(&spec),
            }
        }

        if self.bindings.is_empty() {
            ctx.kill_scope(scope);
            self.scope = None;
            self.state = ControllerState::Armed(ArmMode::Static);
        } else {
            self.state = ControllerState::Armed(ArmMode::Animated);
            info!(section = %self.spec.id, bindings = self.bindings.len(), "section armed");
        }
        Ok(self.state)
    }

    fn first_missing_anchor(&mut self, dom: &dyn DomProbe) -> Option<AnchorMissingError> {
        let missing = self
            .spec
            .anchors
            .iter()
            .find(|a| a.required && !dom.exists(&a.selector))?;
        let err = AnchorMissingError {
            section_id: self.spec.id.clone(),
            selector: missing.selector.clone(),
        };
        if self.logged_missing.insert(missing.selector.clone()) {
            warn!(error = %err, "section degraded to static rendering");
        }
        Some(err)
    }

    fn arm_static(&mut self, reason: Option<SectionError>) -> ControllerState {
        self.degradation = reason;
        self.static_targets.clear();
        let bindings = self.spec.bindings.clone();
        for spec in &bindings {
            self.add_static_targets(spec);
        }
        if bindings.is_empty() {
            self.static_targets.push(self.spec.root.clone());
        }
        self.state = ControllerState::Armed(ArmMode::Static);
        self.state
    }

    fn add_static_targets(&mut self, spec: &BindingSpec) {
        for target in spec.targets(&self.spec.root) {
            if !self.static_targets.contains(&target) {
                self.static_targets.push(target);
            }
        }
    }

    fn build_binding<E: AnimationEngine>(
        &mut self,
        ctx: &mut AnimationEngineContext<E>,
        env: &ArmEnv<'_>,
        scope: ScopeId,
        index: usize,
        spec: &BindingSpec,
    ) -> Option<ActiveBinding> {
        let section_id = self.spec.id.clone();
        let trigger_selector = spec.trigger.clone().unwrap_or_else(|| self.spec.root.clone());
        let mut trigger = ScrollTriggerBinding::new(
            &spec.name,
            &trigger_selector,
            spec.effective_start(),
            spec.effective_end(),
        );
        trigger.scrub = spec.effective_scrub();
        trigger.direction_lock = spec.direction_lock;
        trigger.pinned = spec.pin || matches!(spec.kind, BindingKind::HorizontalScroll { .. });

        let mut timeline = TimelineSpec::new(&format!("{}/{}", section_id, spec.name));
        timeline.scrub = trigger.scrub;
        timeline.duration_s = spec.duration_s;
        let mut track: Option<String> = None;
        let mut split: Option<(String, SplitMode, Vec<TextFragment>)> = None;

        match &spec.kind {
            BindingKind::Entrance | BindingKind::Scrub => {
                if spec.steps.is_empty() {
                    timeline.steps.push(TimelineStep {
                        target: self.spec.root.clone(),
                        from: StyleProps {
                            opacity: Some(0.0),
                            y: Some(40.0),
                            ..StyleProps::default()
                        },
                        to: StyleProps {
                            opacity: Some(1.0),
                            y: Some(0.0),
                            ..StyleProps::default()
                        },
                        ease: Ease::Power2Out,
                        at: 0.0,
                        span: 1.0,
                    });
                }
            }
            BindingKind::HorizontalScroll { track: selector } => {
                let content = match env.dom.scroll_width(selector) {
                    Ok(w) => w,
                    Err(cause) => {
                        warn!(section = %section_id, error = %cause, "horizontal track not measurable; binding skipped");
                        return None;
                    }
                };
                trigger.scroll_amount = (content - env.viewport.width).max(0.0);
                timeline.steps.push(TimelineStep {
                    target: selector.clone(),
                    from: StyleProps::x(0.0),
                    to: StyleProps::x(-trigger.scroll_amount),
                    ease: Ease::Linear,
                    at: 0.0,
                    span: 1.0,
                });
                track = Some(selector.clone());
            }
            BindingKind::TextReveal {
                target,
                split: requested,
            } => {
                let Some(text) = env.dom.text(target) else {
                    warn!(section = %section_id, target = %target, "reveal target has no text; binding skipped");
                    return None;
                };
                // Narrow layouts and weak devices reveal by word.
                let mode = if env.class == ViewportClass::Mobile || env.profile.tier == Tier::Low {
                    SplitMode::Words
                } else {
                    *requested
                };
                let fragments = split_text(&text, mode);
                timeline.split = Some(SplitRequest {
                    target: target.clone(),
                    mode,
                    fragments: fragments.len(),
                });
                timeline.steps.push(TimelineStep {
                    target: target.clone(),
                    from: StyleProps::reveal(0.0),
                    to: StyleProps::reveal(1.0),
                    ease: Ease::Linear,
                    at: 0.0,
                    span: 1.0,
                });
                split = Some((target.clone(), mode, fragments));
            }
            BindingKind::ClipWipe { target } => {
                timeline.steps.push(TimelineStep {
                    target: target.clone(),
                    from: StyleProps::clip_inset(100.0),
                    to: StyleProps::clip_inset(0.0),
                    ease: Ease::Power3Out,
                    at: 0.0,
                    span: 1.0,
                });
            }
        }
        timeline.steps.extend(spec.steps.iter().cloned());

        let range = match trigger.resolve(env.dom, &env.viewport) {
            Ok(range) => range,
            Err(err) => {
                warn!(section = %section_id, error = %err, "binding geometry unavailable; binding skipped");
                return None;
            }
        };

        if trigger.pinned {
            timeline.pin = Some(self.spec.root.clone());
        }
        if let Some(missing) = ctx
            .capabilities()
            .and_then(|caps| timeline.missing_capability(&caps))
        {
            warn!(section = %section_id, binding = %spec.name, missing, "engine plugin unavailable; binding skipped");
            return None;
        }

        // DOM side effects are registered before the timeline, so teardown
        // kills the timeline first and then reverts the DOM.
        if let Some((target, mode, fragments)) = split {
            self.apply_split(ctx, scope, &target, mode, fragments);
        }
        let mut pin_spacer = None;
        if trigger.pinned {
            let spacer_px = pin_spacer_for(&range);
            if self.apply_pin(ctx, scope, spacer_px) {
                pin_spacer = Some(spacer_px);
            }
        }

        let handle = ctx.create_timeline(scope, &timeline)?;
        trigger.timeline = Some(handle);

        let mut played = false;
        if !trigger.scrub.is_scrubbed() && self.section.has_animated && !spec.repeatable {
            // Already animated once this page lifetime: show the end state.
            ctx.set_progress(handle, 1.0);
            ctx.pause(handle);
            played = true;
        }

        debug!(section = %section_id, binding = %spec.name, start = range.start_px, end = range.end_px, "binding built");
        Some(ActiveBinding {
            spec_index: index,
            trigger,
            track,
            pin_spacer,
            played,
            complete: played,
        })
    }

    fn apply_split<E: AnimationEngine>(
        &mut self,
        ctx: &mut AnimationEngineContext<E>,
        scope: ScopeId,
        target: &str,
        mode: SplitMode,
        fragments: Vec<TextFragment>,
    ) {
        if let Err(err) = push_mutation(
            &self.mutations,
            DomMutation::SplitText {
                selector: target.to_string(),
                mode,
                fragments,
            },
        ) {
            warn!(error = %err, "could not queue text split");
            return;
        }
        let queue = self.mutations.clone();
        let selector = target.to_string();
        ctx.register_animation(
            scope,
            cleanup(move || {
                push_mutation(
                    &queue,
                    DomMutation::RevertSplit {
                        selector: selector.clone(),
                    },
                )
            }),
        );
    }

    fn apply_pin<E: AnimationEngine>(
        &mut self,
        ctx: &mut AnimationEngineContext<E>,
        scope: ScopeId,
        spacer_px: f32,
    ) -> bool {
        let selector = self.spec.root.clone();
        if let Err(err) = push_mutation(
            &self.mutations,
            DomMutation::Pin {
                selector: selector.clone(),
                spacer_px,
            },
        ) {
            warn!(error = %err, "could not queue pin");
            return false;
        }
        let queue = self.mutations.clone();
        ctx.register_animation(
            scope,
            cleanup(move || {
                push_mutation(
                    &queue,
                    DomMutation::Unpin {
                        selector: selector.clone(),
                    },
                )
            }),
        );
        true
    }

    /// Drive timelines from the scroll offset. Returns the new visibility of
    /// the section root when it changed.
    pub fn on_scroll<E: AnimationEngine>(
        &mut self,
        ctx: &mut AnimationEngineContext<E>,
        scroll_y: f32,
        direction: Direction,
    ) -> Option<bool> {
        let mut visibility = None;
        if let Some(range) = self.root_range {
            self.section.progress = range.progress_at(scroll_y);
            let visible = scroll_y > range.start_px && scroll_y < range.end_px;
            if visible != self.section.is_visible {
                self.section.is_visible = visible;
                visibility = Some(visible);
            }
        }

        if !matches!(
            self.state,
            ControllerState::Armed(ArmMode::Animated) | ControllerState::Playing | ControllerState::Settled
        ) {
            return visibility;
        }

        for i in 0..self.bindings.len() {
            let repeatable = self.spec.bindings[self.bindings[i].spec_index].repeatable;
            let binding = &mut self.bindings[i];
            let (Some(handle), Some(range)) = (binding.trigger.timeline, binding.trigger.resolved) else {
                continue;
            };
            if !binding.trigger.accepts(direction) {
                continue;
            }
            if binding.trigger.scrub.is_scrubbed() {
                let progress = range.progress_at(scroll_y);
                ctx.set_progress(handle, progress);
                if range.contains(scroll_y) && self.state == ControllerState::Armed(ArmMode::Animated) {
                    self.state = ControllerState::Playing;
                }
                if progress >= 1.0 && !binding.complete {
                    binding.complete = true;
                    self.section.has_animated = true;
                }
            } else if scroll_y >= range.start_px && !binding.played {
                binding.played = true;
                ctx.play(handle);
                if self.state == ControllerState::Armed(ArmMode::Animated) {
                    self.state = ControllerState::Playing;
                }
            } else if repeatable && binding.played && scroll_y < range.start_px {
                // Rewind so the next entry plays again.
                binding.played = false;
                binding.complete = false;
                ctx.pause(handle);
                ctx.set_progress(handle, 0.0);
            }
        }
        self.update_settled();
        visibility
    }

    /// A clock-driven timeline finished. Returns `true` when it belonged here.
    pub fn on_timeline_complete(&mut self, handle: HandleId) -> bool {
        let Some(binding) = self
            .bindings
            .iter_mut()
            .find(|b| b.trigger.timeline == Some(handle))
        else {
            return false;
        };
        binding.complete = true;
        self.section.has_animated = true;
        self.update_settled();
        true
    }

    fn update_settled(&mut self) {
        let active = matches!(
            self.state,
            ControllerState::Armed(ArmMode::Animated) | ControllerState::Playing
        );
        if active && self.bindings.iter().all(|b| b.complete) {
            self.state = ControllerState::Settled;
            debug!(section = %self.spec.id, "section settled");
        }
    }

    /// Recompute pixel offsets from current geometry. Bindings that cannot be
    /// measured keep their previous offsets and are reported.
    pub fn refresh(&mut self, dom: &dyn DomProbe, viewport: &Viewport) -> Vec<RefreshGeometryError> {
        if let Ok(root) = dom.measure(&self.spec.root) {
            self.root_range = Some(root_window(root.y, root.height, viewport));
        }
        let mut errors = Vec::new();
        for binding in &mut self.bindings {
            if let Some(track) = &binding.track {
                match dom.scroll_width(track) {
                    Ok(w) => {
                        let amount = (w - viewport.width).max(0.0);
                        if (amount - binding.trigger.scroll_amount).abs() > f32::EPSILON {
                            debug!(section = %self.spec.id, binding = %binding.trigger.name, from = binding.trigger.scroll_amount, to = amount, "track length changed");
                            self.retarget = true;
                        }
                        binding.trigger.scroll_amount = amount;
                    }
                    Err(cause) => {
                        errors.push(RefreshGeometryError {
                            binding: binding.trigger.name.clone(),
                            cause,
                        });
                        binding.trigger.stale = binding.trigger.resolved.is_some();
                        continue;
                    }
                }
            }
            let range = match binding.trigger.resolve(dom, viewport) {
                Ok(range) => range,
                Err(err) => {
                    debug!(section = %self.spec.id, error = %err, "binding refresh skipped this cycle");
                    errors.push(err);
                    continue;
                }
            };
            if let (Some(previous), false) = (binding.pin_spacer, self.retarget) {
                let spacer_px = pin_spacer_for(&range);
                if (spacer_px - previous).abs() > f32::EPSILON {
                    match push_mutation(
                        &self.mutations,
                        DomMutation::Pin {
                            selector: self.spec.root.clone(),
                            spacer_px,
                        },
                    ) {
                        Ok(()) => binding.pin_spacer = Some(spacer_px),
                        Err(err) => warn!(error = %err, "could not queue pin resize"),
                    }
                }
            }
        }
        errors
    }

    /// Whether the last refresh changed geometry that only a rebuild can
    /// apply. Clears the request.
    pub fn take_rebuild_request(&mut self) -> bool {
        std::mem::take(&mut self.retarget)
    }

    /// Kill this build's scope and return to `Idle`. The `has_animated` latch survives.
    pub fn destroy<E: AnimationEngine>(&mut self, ctx: &mut AnimationEngineContext<E>) -> TeardownReport {
        let report = match self.scope.take() {
            Some(scope) => ctx.kill_scope(scope),
            None => TeardownReport::default(),
        };
        if self.state != ControllerState::Idle {
            debug!(section = %self.spec.id, from = self.state.name(), "section destroyed");
        }
        self.bindings.clear();
        self.static_targets.clear();
        self.degradation = None;
        self.retarget = false;
        self.state = ControllerState::Idle;
        report
    }

    /// Destroy and arm again against the current environment.
    pub fn rebuild<E: AnimationEngine>(
        &mut self,
        ctx: &mut AnimationEngineContext<E>,
        env: &ArmEnv<'_>,
    ) -> Result<ControllerState, SectionError> {
        self.destroy(ctx);
        self.arm(ctx, env)
    }

    /// Final-state styles for everything this section renders without a timeline.
    pub fn static_styles(&self) -> Vec<StyleWrite> {
        self.static_targets
            .iter()
            .map(|selector| StyleWrite {
                selector: selector.clone(),
                style: ResolvedStyle::default(),
            })
            .collect()
    }

    /// Final-state styles for every element the section touches. Rendered by the
    /// section boundary when arming faulted.
    pub fn fallback_styles(&self) -> Vec<StyleWrite> {
        let mut targets = vec![self.spec.root.clone()];
        for binding in &self.spec.bindings {
            for target in binding.targets(&self.spec.root) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
            .into_iter()
            .map(|selector| StyleWrite {
                selector,
                style: ResolvedStyle::default(),
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<DebugMarker> {
        self.bindings
            .iter()
            .filter_map(|b| {
                b.trigger.resolved.map(|r| DebugMarker {
                    section_id: self.spec.id.clone(),
                    binding: b.trigger.name.clone(),
                    start_px: r.start_px,
                    end_px: r.end_px,
                    stale: b.trigger.stale,
                })
            })
            .collect()
    }
}

fn pin_spacer_for(range: &ResolvedRange) -> f32 {
    (range.end_px - range.start_px).max(0.0)
}

/// Scroll window during which any part of the root is on screen.
fn root_window(top: f32, height: f32, viewport: &Viewport) -> ResolvedRange {
    ResolvedRange {
        start_px: TriggerPosition::new(Edge::Top, Edge::Bottom).scroll_offset(top, height, viewport),
        end_px: TriggerPosition::new(Edge::Bottom, Edge::Top).scroll_offset(top, height, viewport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityProfile;
    use crate::engine::HeadlessEngine;
    use crate::geometry::{Rect, StaticLayout};

    fn layout() -> StaticLayout {
        StaticLayout::new(6000.0)
            .with_node("#story", Rect::new(0.0, 1000.0, 1920.0, 1000.0))
            .with_text("#story h2", Rect::new(0.0, 1100.0, 800.0, 100.0), "Built to last")
    }

    fn story() -> SectionSpec {
        SectionSpec::new("story", "#story")
            .with_anchor("#story h2")
            .with_binding(BindingSpec::new(
                "headline",
                BindingKind::TextReveal {
                    target: "#story h2".into(),
                    split: SplitMode::Chars,
                },
            ))
    }

    fn env<'a>(dom: &'a StaticLayout, profile: &'a CapabilityProfile, width: f32) -> ArmEnv<'a> {
        ArmEnv {
            dom,
            viewport: Viewport::new(width, 1000.0),
            class: crate::config::Breakpoints::default().classify(width),
            profile,
        }
    }

    fn ready() -> AnimationEngineContext<HeadlessEngine> {
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::new());
        ctx.begin_init();
        ctx
    }

    #[test]
    fn spec_parses_from_json() {
        let spec = SectionSpec::from_json(
            r##"{
                "id": "showcase",
                "root": "#showcase",
                "anchors": [{ "selector": "#track" }],
                "bindings": [
                    { "name": "slide", "type": "horizontal_scroll", "track": "#track", "breakpoints": ["desktop", "tablet"] },
                    { "name": "wipe", "type": "clip_wipe", "target": "#title", "start": "top 80%", "end": "top 20%", "scrub": 0.5 }
                ]
            }"##,
        )
        .unwrap();
        assert_eq!(spec.bindings.len(), 2);
        assert!(spec.anchors[0].required);
        assert_eq!(spec.bindings[1].scrub, ScrubMode::Lag(0.5));
        assert!(!spec.bindings[0].applies_to(ViewportClass::Mobile, Tier::High));
    }

    #[test]
    fn duplicate_binding_names_are_rejected() {
        let spec = SectionSpec::new("s", "#s")
            .with_binding(BindingSpec::new("a", BindingKind::Entrance))
            .with_binding(BindingSpec::new("a", BindingKind::Scrub));
        assert!(matches!(spec.validate(), Err(SectionError::InvalidSpec { .. })));
    }

    #[test]
    fn stays_idle_while_engine_loads() {
        let dom = layout();
        let profile = CapabilityProfile::default();
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::delayed(3));
        ctx.begin_init();
        let mut c = SectionAnimationController::new(story(), MutationQueue::default());
        assert_eq!(c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap(), ControllerState::Idle);
    }

    #[test]
    fn failed_engine_still_tracks_visibility() {
        let dom = layout();
        let profile = CapabilityProfile::default();
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::failing(
            crate::error::EngineInitError::Unavailable {
                reason: "script blocked".into(),
            },
        ));
        ctx.begin_init();
        let mut c = SectionAnimationController::new(story(), MutationQueue::default());
        assert_eq!(
            c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap(),
            ControllerState::Armed(ArmMode::Static)
        );
        // Root spans 1000..2000 with a 1000px viewport: visible for 0 < y < 2000.
        assert_eq!(c.on_scroll(&mut ctx, 500.0, Direction::Forward), Some(true));
        assert_eq!(c.on_scroll(&mut ctx, 2500.0, Direction::Forward), Some(false));
        assert!(c.static_styles().iter().all(|s| s.style.is_fully_visible()));
    }

    #[test]
    fn reveal_target_without_text_is_skipped() {
        let dom = StaticLayout::new(6000.0)
            .with_node("#story", Rect::new(0.0, 1000.0, 1920.0, 1000.0))
            .with_node("#story h2", Rect::new(0.0, 1100.0, 800.0, 100.0));
        let profile = CapabilityProfile::default();
        let queue = MutationQueue::default();
        let mut ctx = ready();
        let mut c = SectionAnimationController::new(story(), queue.clone());
        assert_eq!(
            c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap(),
            ControllerState::Armed(ArmMode::Static)
        );
        assert!(queue.borrow().is_empty());
        assert!(c.static_styles().iter().any(|s| s.selector == "#story h2"));
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn refresh_resizes_pin_spacer() {
        let mut dom = layout();
        let profile = CapabilityProfile::default();
        let queue = MutationQueue::default();
        let mut ctx = ready();
        let mut rise = BindingSpec::new("rise", BindingKind::Scrub);
        rise.pin = true;
        let spec = SectionSpec::new("story", "#story").with_binding(rise);
        let mut c = SectionAnimationController::new(spec, queue.clone());
        let viewport = Viewport::new(1920.0, 1000.0);
        c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap();
        // "top 80%" to "bottom top" over a 1000px root at 1000px: 200..2000.
        assert_eq!(
            queue.borrow().last(),
            Some(&DomMutation::Pin {
                selector: "#story".into(),
                spacer_px: 1800.0
            })
        );

        // Unchanged geometry queues nothing.
        queue.borrow_mut().clear();
        assert!(c.refresh(&dom, &viewport).is_empty());
        assert!(queue.borrow().is_empty());

        dom.set_rect("#story", Rect::new(0.0, 1000.0, 1920.0, 1500.0));
        assert!(c.refresh(&dom, &viewport).is_empty());
        assert_eq!(
            *queue.borrow(),
            vec![DomMutation::Pin {
                selector: "#story".into(),
                spacer_px: 2300.0
            }]
        );
        assert!(!c.take_rebuild_request());
        assert_eq!(c.builds(), 1);
    }

    #[test]
    fn longer_track_requests_rebuild() {
        let mut dom = StaticLayout::new(8000.0)
            .with_node("#gallery", Rect::new(0.0, 1000.0, 1920.0, 1000.0))
            .with_scroll_width("#track", Rect::new(0.0, 1100.0, 1920.0, 600.0), 5760.0);
        let profile = CapabilityProfile::default();
        let mut ctx = ready();
        let spec = SectionSpec::new("gallery", "#gallery").with_binding(BindingSpec::new(
            "slide",
            BindingKind::HorizontalScroll { track: "#track".into() },
        ));
        let mut c = SectionAnimationController::new(spec, MutationQueue::default());
        let viewport = Viewport::new(1920.0, 1000.0);
        c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap();
        assert_eq!(c.binding("slide").unwrap().scroll_amount, 3840.0);

        c.refresh(&dom, &viewport);
        assert!(!c.take_rebuild_request());

        dom = dom.with_scroll_width("#track", Rect::new(0.0, 1100.0, 1920.0, 600.0), 6000.0);
        c.refresh(&dom, &viewport);
        assert_eq!(c.binding("slide").unwrap().scroll_amount, 4080.0);
        assert!(c.take_rebuild_request());
        assert!(!c.take_rebuild_request(), "request is cleared once taken");
    }

    #[test]
    fn missing_anchor_arms_static_and_logs_once() {
        let dom = StaticLayout::new(6000.0).with_node("#story", Rect::new(0.0, 1000.0, 1920.0, 1000.0));
        let profile = CapabilityProfile::default();
        let mut ctx = ready();
        let mut c = SectionAnimationController::new(story(), MutationQueue::default());
        let e = env(&dom, &profile, 1920.0);
        assert_eq!(c.arm(&mut ctx, &e).unwrap(), ControllerState::Armed(ArmMode::Static));
        assert!(matches!(c.degradation(), Some(SectionError::AnchorMissing(_))));
        c.rebuild(&mut ctx, &e).unwrap();
        assert_eq!(c.logged_missing.len(), 1);
        let styles = c.static_styles();
        assert_eq!(styles.len(), 1);
        assert!(styles[0].style.is_fully_visible());
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn text_split_follows_breakpoint_and_reverts_on_destroy() {
        let dom = layout();
        let profile = CapabilityProfile::default();
        let queue = MutationQueue::default();
        let mut ctx = ready();
        let mut c = SectionAnimationController::new(story(), queue.clone());

        c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap();
        assert!(matches!(
            queue.borrow().last(),
            Some(DomMutation::SplitText { mode: SplitMode::Chars, fragments, .. }) if fragments.len() == 11
        ));

        c.rebuild(&mut ctx, &env(&dom, &profile, 375.0)).unwrap();
        let q = queue.borrow();
        assert!(q.iter().any(|m| matches!(m, DomMutation::RevertSplit { .. })));
        assert!(matches!(
            q.last(),
            Some(DomMutation::SplitText { mode: SplitMode::Words, fragments, .. }) if fragments.len() == 3
        ));
    }

    #[test]
    fn entrance_plays_once_and_settles() {
        let dom = layout();
        let profile = CapabilityProfile::default();
        let mut ctx = ready();
        let spec = SectionSpec::new("story", "#story").with_binding(BindingSpec::new("fade", BindingKind::Entrance));
        let mut c = SectionAnimationController::new(spec, MutationQueue::default());
        c.arm(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap();

        // "top 80%" of a root at 1000px with a 1000px viewport starts at 200.
        assert_eq!(c.on_scroll(&mut ctx, 0.0, Direction::Forward), None);
        assert_eq!(c.on_scroll(&mut ctx, 250.0, Direction::Forward), Some(true));
        assert_eq!(c.state(), ControllerState::Playing);
        let completed = ctx.advance(2.0);
        assert_eq!(completed.len(), 1);
        assert!(c.on_timeline_complete(completed[0]));
        assert_eq!(c.state(), ControllerState::Settled);
        assert!(c.section_state().has_animated);

        // The latch survives a rebuild and the entrance is not replayed.
        c.rebuild(&mut ctx, &env(&dom, &profile, 1920.0)).unwrap();
        assert!(c.section_state().has_animated);
        let handle = c.timeline_handles()[0];
        c.on_scroll(&mut ctx, 300.0, Direction::Forward);
        assert_ne!(ctx.handle_state(handle), Some(crate::registry::HandleState::Playing));
    }
}
