//! Shared animation root: engine initialisation, timeline factory and the
//! cleanup registry.
//!
//! State machine: `Uninitialized → Loading → Ready | Failed`. No animation
//! work happens before `Ready`; in `Failed` every timeline request returns
//! `None` and callers render their static state.

use tracing::{debug, info, warn};

use crate::engine::{AnimationEngine, EngineCapabilities, InitPoll, TimelineSpec};
use crate::error::{CleanupError, EngineInitError};
use crate::ids::{HandleId, ScopeId, TimelineId};
use crate::registry::{AnimationHandle, Cleanup, CleanupRegistry, HandleState, Rejected};
use crate::style::StyleWrite;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready(EngineCapabilities),
    Failed(EngineInitError),
}

impl EngineState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// `Ready` or `Failed`: no further transitions.
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

/// Outcome of a teardown pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TeardownReport {
    /// Cleanups invoked (successfully or not).
    pub invoked: usize,
    pub killed_timelines: usize,
    pub errors: Vec<CleanupError>,
}

impl TeardownReport {
    pub fn merge(&mut self, other: TeardownReport) {
        self.invoked += other.invoked;
        self.killed_timelines += other.killed_timelines;
        self.errors.extend(other.errors);
    }
}

type ReadyListener = Box<dyn FnOnce(&EngineCapabilities)>;

pub struct AnimationEngineContext<E: AnimationEngine> {
    engine: E,
    state: EngineState,
    registry: CleanupRegistry,
    clock_paused: bool,
    paused_by_visibility: Vec<HandleId>,
    ready_listeners: Vec<ReadyListener>,
}

impl<E: AnimationEngine> std::fmt::Debug for AnimationEngineContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationEngineContext")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("clock_paused", &self.clock_paused)
            .finish()
    }
}

impl<E: AnimationEngine> AnimationEngineContext<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: EngineState::Uninitialized,
            registry: CleanupRegistry::new(),
            clock_paused: false,
            paused_by_visibility: Vec::new(),
            ready_listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn capabilities(&self) -> Option<EngineCapabilities> {
        match self.state {
            EngineState::Ready(caps) => Some(caps),
            _ => None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn registry(&self) -> &CleanupRegistry {
        &self.registry
    }

    /// Start plugin loading. Only effective from `Uninitialized`.
    pub fn begin_init(&mut self) -> &EngineState {
        if self.state == EngineState::Uninitialized {
            info!("animation engine: loading plugins");
            self.state = EngineState::Loading;
            self.poll_init();
        }
        &self.state
    }

    /// Resume initialisation. Returns `true` when the state changed on this call.
    pub fn poll_init(&mut self) -> bool {
        if self.state != EngineState::Loading {
            return false;
        }
        match self.engine.poll_init() {
            InitPoll::Pending => false,
            InitPoll::Ready(caps) => {
                info!(?caps, "animation engine ready");
                self.state = EngineState::Ready(caps);
                for listener in self.ready_listeners.drain(..) {
                    listener(&caps);
                }
                true
            }
            InitPoll::Failed(err) => {
                warn!(error = %err, "animation engine failed to initialise; rendering statically");
                self.state = EngineState::Failed(err);
                self.ready_listeners.clear();
                true
            }
        }
    }

    /// Subscribe to readiness. Runs immediately when already `Ready`; dropped on failure.
    pub fn on_ready<F>(&mut self, listener: F)
    where
        F: FnOnce(&EngineCapabilities) + 'static,
    {
        match self.state {
            EngineState::Ready(caps) => listener(&caps),
            EngineState::Failed(_) => {}
            _ => self.ready_listeners.push(Box::new(listener)),
        }
    }

    pub fn open_scope(&mut self) -> ScopeId {
        self.registry.open_scope()
    }

    pub fn is_scope_live(&self, scope: ScopeId) -> bool {
        self.registry.is_scope_live(scope)
    }

    /// Register a cleanup under `scope`. Registering the same cleanup again is a no-op
    /// returning the existing handle. A cleanup offered to a dead scope runs immediately.
    pub fn register_animation(&mut self, scope: ScopeId, cleanup: Cleanup) -> Option<HandleId> {
        match self.registry.insert(scope, None, Some(cleanup)) {
            Ok(id) => Some(id),
            Err(Rejected::DeadScope(cleanup)) => {
                warn!(?scope, "cleanup registered on a destroyed scope; running it now");
                if let Some(c) = cleanup {
                    if let Err(err) = c() {
                        warn!(error = %err, "late cleanup failed");
                    }
                }
                None
            }
        }
    }

    /// Remove a handle without invoking its cleanup; the cleanup is returned to the caller.
    pub fn unregister_animation(&mut self, handle: HandleId) -> Option<Cleanup> {
        let mut removed = self.registry.remove(handle)?;
        self.paused_by_visibility.retain(|h| *h != handle);
        removed.take_cleanup()
    }

    /// Build a timeline for `scope`. `None` means "skip the animation and render
    /// the static state".
    pub fn create_timeline(&mut self, scope: ScopeId, spec: &TimelineSpec) -> Option<HandleId> {
        let caps = match &self.state {
            EngineState::Ready(caps) => *caps,
            other => {
                warn!(
                    label = %spec.label,
                    state = other.name(),
                    "timeline requested before the animation engine is ready"
                );
                return None;
            }
        };
        if let Some(missing) = spec.missing_capability(&caps) {
            warn!(label = %spec.label, missing, "engine plugin unavailable; timeline skipped");
            return None;
        }
        if !self.registry.is_scope_live(scope) {
            warn!(label = %spec.label, ?scope, "timeline requested on a destroyed scope");
            return None;
        }

        let timeline = self.engine.create_timeline(spec);
        match self.registry.insert(scope, Some(timeline), None) {
            Ok(id) => {
                debug!(label = %spec.label, ?id, ?timeline, "timeline created");
                Some(id)
            }
            Err(_) => {
                self.engine.kill(timeline);
                None
            }
        }
    }

    fn live_timeline(&self, handle: HandleId) -> Option<TimelineId> {
        let h = self.registry.get(handle)?;
        if !h.state.is_live() || !self.registry.is_scope_live(h.owner) {
            return None;
        }
        h.timeline
    }

    /// Seek a timeline. Refused for killed handles and destroyed scopes.
    pub fn set_progress(&mut self, handle: HandleId, progress: f32) -> bool {
        let Some(timeline) = self.live_timeline(handle) else {
            return false;
        };
        self.engine.set_progress(timeline, progress);
        if !self.clock_paused {
            self.registry.set_state(handle, HandleState::Playing);
        }
        true
    }

    pub fn play(&mut self, handle: HandleId) -> bool {
        let Some(timeline) = self.live_timeline(handle) else {
            return false;
        };
        self.engine.play(timeline);
        let state = if self.clock_paused {
            self.paused_by_visibility.push(handle);
            HandleState::Paused
        } else {
            HandleState::Playing
        };
        self.registry.set_state(handle, state);
        true
    }

    pub fn pause(&mut self, handle: HandleId) -> bool {
        let Some(timeline) = self.live_timeline(handle) else {
            return false;
        };
        self.engine.pause(timeline);
        self.registry.set_state(handle, HandleState::Paused);
        true
    }

    pub fn handle_state(&self, handle: HandleId) -> Option<HandleState> {
        self.registry.get(handle).map(|h| h.state)
    }

    /// Page visibility changed: pause or resume the global clock. Handles survive.
    pub fn set_page_visible(&mut self, visible: bool) {
        let paused = !visible;
        if self.clock_paused == paused {
            return;
        }
        self.clock_paused = paused;
        self.engine.set_clock_paused(paused);
        if paused {
            let playing: Vec<HandleId> = self
                .registry
                .iter()
                .filter(|h| h.state == HandleState::Playing)
                .map(|h| h.id)
                .collect();
            for id in &playing {
                self.registry.set_state(*id, HandleState::Paused);
            }
            self.paused_by_visibility.extend(playing);
        } else {
            for id in self.paused_by_visibility.drain(..) {
                self.registry.set_state(id, HandleState::Playing);
            }
        }
        debug!(visible, "animation clock visibility changed");
    }

    pub fn is_clock_paused(&self) -> bool {
        self.clock_paused
    }

    /// Advance the engine clock and map completed timelines back to handles.
    pub fn advance(&mut self, dt_s: f32) -> Vec<HandleId> {
        if !self.state.is_ready() {
            return Vec::new();
        }
        let completed = self.engine.advance(dt_s);
        let mut out = Vec::with_capacity(completed.len());
        for timeline in completed {
            if let Some(id) = self.registry.find_timeline(timeline) {
                self.registry.set_state(id, HandleState::Paused);
                out.push(id);
            }
        }
        out
    }

    pub fn rendered_styles(&self) -> Vec<StyleWrite> {
        self.engine.rendered_styles()
    }

    /// Tear down one scope, newest handle first. The scope is closed afterwards.
    pub fn kill_scope(&mut self, scope: ScopeId) -> TeardownReport {
        let handles = self.registry.drain_scope_lifo(scope);
        self.teardown(handles)
    }

    /// Invoke every registered cleanup in reverse registration order and clear the registry.
    pub fn kill_all(&mut self) -> TeardownReport {
        let handles = self.registry.drain_lifo();
        let report = self.teardown(handles);
        self.paused_by_visibility.clear();
        if !report.errors.is_empty() {
            warn!(failures = report.errors.len(), "kill_all finished with cleanup failures");
        }
        report
    }

    fn teardown(&mut self, handles: Vec<AnimationHandle>) -> TeardownReport {
        let mut report = TeardownReport::default();
        for mut handle in handles {
            handle.state = HandleState::Killed;
            self.paused_by_visibility.retain(|h| *h != handle.id);
            // Listeners are detached before the timeline is destroyed.
            if let Some(cleanup) = handle.take_cleanup() {
                report.invoked += 1;
                if let Err(err) = cleanup() {
                    warn!(handle = ?handle.id, error = %err, "cleanup failed; continuing teardown");
                    report.errors.push(CleanupError {
                        handle: handle.id,
                        reason: err.to_string(),
                    });
                }
            }
            if let Some(timeline) = handle.timeline {
                self.engine.kill(timeline);
                report.killed_timelines += 1;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::engine::{EngineCommand, HeadlessEngine};
    use crate::registry::cleanup;

    fn ready_ctx() -> AnimationEngineContext<HeadlessEngine> {
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::new());
        ctx.begin_init();
        assert!(ctx.is_ready());
        ctx
    }

    #[test]
    fn lifo_kill_all_with_failure_isolated() {
        let mut ctx = ready_ctx();
        let scope = ctx.open_scope();
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["A", "B", "C"] {
            let order = order.clone();
            ctx.register_animation(
                scope,
                cleanup(move || {
                    order.borrow_mut().push(name);
                    if name == "B" {
                        anyhow::bail!("B exploded");
                    }
                    Ok(())
                }),
            );
        }
        let report = ctx.kill_all();
        assert_eq!(*order.borrow(), vec!["C", "B", "A"]);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(ctx.registry().is_empty());

        // A second pass has nothing left to invoke.
        assert_eq!(ctx.kill_all().invoked, 0);
        assert_eq!(order.borrow().len(), 3);
    }

    #[test]
    fn timelines_refused_until_ready() {
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::delayed(1));
        let scope = ctx.open_scope();
        let spec = TimelineSpec::new("t");
        assert!(ctx.create_timeline(scope, &spec).is_none(), "uninitialized");
        ctx.begin_init();
        assert_eq!(ctx.state(), &EngineState::Loading);
        assert!(ctx.create_timeline(scope, &spec).is_none(), "loading");
        assert!(ctx.poll_init());
        assert!(ctx.create_timeline(scope, &spec).is_some());
    }

    #[test]
    fn failed_engine_never_creates_timelines() {
        let err = EngineInitError::PluginLoad {
            plugin: "ScrollTrigger".into(),
            reason: "404".into(),
        };
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::failing(err.clone()));
        ctx.begin_init();
        assert_eq!(ctx.state(), &EngineState::Failed(err));
        let scope = ctx.open_scope();
        assert!(ctx.create_timeline(scope, &TimelineSpec::new("t")).is_none());
        assert!(!ctx.poll_init());
    }

    #[test]
    fn ready_listeners_fire_once() {
        let mut ctx = AnimationEngineContext::new(HeadlessEngine::delayed(1));
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        ctx.on_ready(move |_| *h.borrow_mut() += 1);
        ctx.begin_init();
        assert_eq!(*hits.borrow(), 0);
        ctx.poll_init();
        ctx.poll_init();
        assert_eq!(*hits.borrow(), 1);
        let h = hits.clone();
        ctx.on_ready(move |_| *h.borrow_mut() += 1);
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    fn killed_scope_cannot_drive_timelines() {
        let mut ctx = ready_ctx();
        let scope = ctx.open_scope();
        let handle = ctx
            .create_timeline(scope, &TimelineSpec::new("t"))
            .expect("timeline");
        assert!(ctx.set_progress(handle, 0.5));
        let report = ctx.kill_scope(scope);
        assert_eq!(report.killed_timelines, 1);
        assert!(!ctx.set_progress(handle, 0.7));
        assert!(!ctx.play(handle));
        assert!(ctx
            .engine()
            .commands()
            .iter()
            .any(|c| matches!(c, EngineCommand::Kill { .. })));
    }

    #[test]
    fn dead_scope_registration_runs_cleanup_immediately() {
        let mut ctx = ready_ctx();
        let scope = ctx.open_scope();
        ctx.kill_scope(scope);
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        let id = ctx.register_animation(
            scope,
            cleanup(move || {
                *h.borrow_mut() += 1;
                Ok(())
            }),
        );
        assert!(id.is_none());
        assert_eq!(*hits.borrow(), 1);
        ctx.kill_all();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn unregister_transfers_without_invoking() {
        let mut ctx = ready_ctx();
        let scope = ctx.open_scope();
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        let id = ctx
            .register_animation(
                scope,
                cleanup(move || {
                    *h.borrow_mut() += 1;
                    Ok(())
                }),
            )
            .unwrap();
        let moved = ctx.unregister_animation(id).expect("cleanup returned");
        ctx.kill_all();
        assert_eq!(*hits.borrow(), 0);
        moved().unwrap();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn visibility_pauses_clock_without_killing() {
        let mut ctx = ready_ctx();
        let scope = ctx.open_scope();
        let handle = ctx.create_timeline(scope, &TimelineSpec::new("t")).unwrap();
        ctx.play(handle);
        ctx.set_page_visible(false);
        assert_eq!(ctx.handle_state(handle), Some(HandleState::Paused));
        assert!(ctx.engine().is_clock_paused());
        assert!(ctx.advance(10.0).is_empty());
        ctx.set_page_visible(true);
        assert_eq!(ctx.handle_state(handle), Some(HandleState::Playing));
        assert_eq!(ctx.advance(1.0), vec![handle]);
    }
}
