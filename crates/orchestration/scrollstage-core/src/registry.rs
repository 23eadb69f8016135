//! Handle arena for every animation and cleanup on the page.
//!
//! Handles are keyed by opaque [`HandleId`]s and grouped by owning
//! [`ScopeId`]. Teardown walks the registry in reverse registration order, so
//! a child registered after its parent is always torn down first. A handle is
//! removed from the arena before its cleanup runs, which makes a second
//! invocation impossible.

use std::fmt;
use std::rc::Rc;

use hashbrown::HashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{HandleId, IdAllocator, ScopeId, TimelineId};

/// Teardown callback. Identity (the `Rc` allocation) is what makes a repeated
/// registration a no-op.
pub type Cleanup = Rc<dyn Fn() -> anyhow::Result<()>>;

/// Wrap a closure as a [`Cleanup`].
pub fn cleanup<F>(f: F) -> Cleanup
where
    F: Fn() -> anyhow::Result<()> + 'static,
{
    Rc::new(f)
}

#[inline]
fn same_cleanup(a: &Cleanup, b: &Cleanup) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Pending,
    Playing,
    Paused,
    Killed,
}

impl HandleState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Killed => "killed",
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Killed)
    }
}

/// One registered animation: an optional engine timeline plus an optional cleanup.
pub struct AnimationHandle {
    pub id: HandleId,
    pub owner: ScopeId,
    pub timeline: Option<TimelineId>,
    pub state: HandleState,
    cleanup: Option<Cleanup>,
}

impl AnimationHandle {
    /// Take the cleanup out of the handle. Returns `None` on every call after the first.
    pub fn take_cleanup(&mut self) -> Option<Cleanup> {
        self.cleanup.take()
    }

    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }
}

impl fmt::Debug for AnimationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("timeline", &self.timeline)
            .field("state", &self.state)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// Why a registration was refused.
pub enum Rejected {
    /// The owning scope was already torn down; the cleanup is handed back.
    DeadScope(Option<Cleanup>),
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::DeadScope(c) => f
                .debug_tuple("DeadScope")
                .field(&c.as_ref().map(|_| "cleanup"))
                .finish(),
        }
    }
}

#[derive(Default)]
pub struct CleanupRegistry {
    ids: IdAllocator,
    handles: IndexMap<HandleId, AnimationHandle>,
    live_scopes: HashSet<ScopeId>,
}

impl fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("handles", &self.handles.len())
            .field("live_scopes", &self.live_scope_count())
            .finish()
    }
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_scope(&mut self) -> ScopeId {
        let scope = self.ids.alloc_scope();
        self.live_scopes.insert(scope);
        scope
    }

    /// Scopes are never reopened, so anything not in the live set is dead.
    #[inline]
    pub fn is_scope_live(&self, scope: ScopeId) -> bool {
        self.live_scopes.contains(&scope)
    }

    pub fn live_scope_count(&self) -> usize {
        self.live_scopes.len()
    }

    /// Insert a handle. A cleanup already present (same `Rc`) returns its existing id.
    pub fn insert(
        &mut self,
        owner: ScopeId,
        timeline: Option<TimelineId>,
        cleanup: Option<Cleanup>,
    ) -> Result<HandleId, Rejected> {
        if !self.is_scope_live(owner) {
            return Err(Rejected::DeadScope(cleanup));
        }
        if let Some(c) = &cleanup {
            if let Some(existing) = self.find_cleanup(c) {
                return Ok(existing);
            }
        }
        let id = self.ids.alloc_handle();
        self.handles.insert(
            id,
            AnimationHandle {
                id,
                owner,
                timeline,
                state: HandleState::Pending,
                cleanup,
            },
        );
        Ok(id)
    }

    pub fn find_cleanup(&self, cleanup: &Cleanup) -> Option<HandleId> {
        self.handles
            .values()
            .find(|h| h.cleanup.as_ref().is_some_and(|c| same_cleanup(c, cleanup)))
            .map(|h| h.id)
    }

    pub fn get(&self, id: HandleId) -> Option<&AnimationHandle> {
        self.handles.get(&id)
    }

    pub fn set_state(&mut self, id: HandleId, state: HandleState) -> bool {
        match self.handles.get_mut(&id) {
            Some(h) if h.state.is_live() => {
                h.state = state;
                true
            }
            _ => false,
        }
    }

    /// Remove a handle without running its cleanup (ownership transfer).
    pub fn remove(&mut self, id: HandleId) -> Option<AnimationHandle> {
        self.handles.shift_remove(&id)
    }

    /// Remove every handle, newest first. All scopes are closed.
    pub fn drain_lifo(&mut self) -> Vec<AnimationHandle> {
        let mut out: Vec<AnimationHandle> = self.handles.drain(..).map(|(_, h)| h).collect();
        out.reverse();
        self.live_scopes.clear();
        out
    }

    /// Remove one scope's handles, newest first, and close the scope.
    pub fn drain_scope_lifo(&mut self, scope: ScopeId) -> Vec<AnimationHandle> {
        let ids: Vec<HandleId> = self
            .handles
            .values()
            .rev()
            .filter(|h| h.owner == scope)
            .map(|h| h.id)
            .collect();
        let out = ids
            .into_iter()
            .filter_map(|id| self.handles.shift_remove(&id))
            .collect();
        self.live_scopes.remove(&scope);
        out
    }

    pub fn scope_handles(&self, scope: ScopeId) -> impl Iterator<Item = &AnimationHandle> {
        self.handles.values().filter(move |h| h.owner == scope)
    }

    pub fn find_timeline(&self, timeline: TimelineId) -> Option<HandleId> {
        self.handles
            .values()
            .find(|h| h.timeline == Some(timeline))
            .map(|h| h.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimationHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
