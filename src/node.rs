//! The versioned node that makes up the list's chain.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// A single link in the chain. `elm` and `insert_version` are fixed at
/// construction; `removed_version` transitions 0 -> V exactly once;
/// `next` is rewritten by CAS as the chain grows or is unlinked.
pub(crate) struct Node<E> {
    pub(crate) elm: E,
    pub(crate) insert_version: u64,
    pub(crate) removed_version: AtomicU64,
    pub(crate) next: AtomicPtr<Node<E>>,
}

impl<E> Node<E> {
    pub(crate) fn alloc(elm: E, insert_version: u64, next: *mut Node<E>) -> *mut Node<E> {
        Box::into_raw(Box::new(Node {
            elm,
            insert_version,
            removed_version: AtomicU64::new(0),
            next: AtomicPtr::new(next),
        }))
    }

    /// `insert_version <= s && (removed_version == 0 || removed_version > s)`
    pub(crate) fn is_visible_at(&self, s: u64) -> bool {
        let removed = self.removed_version.load(Ordering::Acquire);
        self.insert_version <= s && (removed == 0 || removed > s)
    }

    /// Tombstone this node with `version`, unless it is already removed.
    /// Returns true if this call performed the 0 -> version transition.
    pub(crate) fn mark_removed(&self, version: u64) -> bool {
        self.removed_version
            .compare_exchange(0, version, Ordering::Release, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn removed_version(&self) -> u64 {
        self.removed_version.load(Ordering::Acquire)
    }

    pub(crate) fn next(&self) -> *mut Node<E> {
        self.next.load(Ordering::Acquire)
    }
}

/// Free a node that the reclaimer has confirmed is unreachable from any
/// hazard slot. `elm` is handed to `free_cb` before the box is dropped.
pub(crate) unsafe fn free_node<E>(
    node: *mut Node<E>,
    free_cb: &Option<Box<dyn Fn(E) + Send + Sync>>,
) {
    debug_assert!(!node.is_null());
    let boxed = Box::from_raw(node);
    if let Some(cb) = free_cb {
        cb(boxed.elm);
    }
}
