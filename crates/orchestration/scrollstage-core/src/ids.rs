//! Identifiers and simple allocators for orchestrated resources.

use serde::{Deserialize, Serialize};

/// Opaque key for an entry in the animation handle registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HandleId(pub u32);

/// Ownership scope for handles. One scope per controller build.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

/// Timeline key handed out by an [`AnimationEngine`](crate::engine::AnimationEngine).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TimelineId(pub u32);

/// Key for an asset tracked by the load scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AssetId(pub u32);

/// Monotonic allocator for HandleId, ScopeId and AssetId.
/// Ids are never reused within a page lifetime, so a stale id can never alias a live entry.
#[derive(Default, Debug)]
pub struct IdAllocator {
    next_handle: u32,
    next_scope: u32,
    next_asset: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc_handle(&mut self) -> HandleId {
        let id = HandleId(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        id
    }

    #[inline]
    pub fn alloc_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope = self.next_scope.wrapping_add(1);
        id
    }

    #[inline]
    pub fn alloc_asset(&mut self) -> AssetId {
        let id = AssetId(self.next_asset);
        self.next_asset = self.next_asset.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_monotonic() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_handle(), HandleId(0));
        assert_eq!(alloc.alloc_handle(), HandleId(1));
        assert_eq!(alloc.alloc_scope(), ScopeId(0));
        assert_eq!(alloc.alloc_scope(), ScopeId(1));
        assert_eq!(alloc.alloc_asset(), AssetId(0));
        assert_eq!(alloc.alloc_handle(), HandleId(2));
    }
}
