//! `MvccList<E>`: the concurrent, MVCC-versioned singly-linked list.
//!
//! Every insert stamps the new node's `insert_version` with a fresh
//! value from the list's commit counter; every removal stamps the
//! target's `removed_version` the same way. A node is visible at
//! snapshot `S` iff `insert_version <= S && (removed_version == 0 ||
//! removed_version > S)` (`Node::is_visible_at`). Direct (non-`Txn`)
//! operations query "now", which is the same predicate evaluated at
//! `u64::MAX` — every inserted node already satisfies `insert_version
//! <= u64::MAX`, so it collapses to a plain tombstone check.
//!
//! Physical unlinking and freeing is entirely the reclaimer's job
//! (`reclaim`): list operations only ever stamp `removed_version`, never
//! touch the chain on removal. This keeps every traversal a simple
//! forward walk with at most one predecessor/successor pair hazard-
//! protected at a time, the same shape as the teacher's queue/stack
//! CAS loops in `lockfree_queue.rs`/`lockfree_stack.rs`.

use crate::error::Error;
use crate::hazard::{HazardRegistry, SnapshotGuard};
use crate::node::{self, Node};
use crate::txn::Txn;
use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::time::Duration;

/// Default TTL for the cached `min_active_snapshot` read; see
/// `HazardRegistry::min_active_snapshot`.
const DEFAULT_MIN_VERSION_CACHE_TTL: Duration = Duration::from_millis(1);

/// A lock-free, MVCC-versioned singly-linked list.
///
/// Readers never block writers and writers never block readers: every
/// operation is either a single CAS or a tombstone store, and
/// concurrent snapshot readers (`iter`, `Txn`) see a consistent view of
/// the list as of the moment they started, regardless of concurrent
/// mutation. Memory is reclaimed only once no hazard pointer or active
/// snapshot can still observe it (`reclaim`).
pub struct MvccList<E> {
    pub(crate) head: AtomicPtr<Node<E>>,
    pub(crate) commit_counter: AtomicU64,
    pub(crate) registry: HazardRegistry<E>,
    pub(crate) free_cb: Option<Box<dyn Fn(E) + Send + Sync>>,
}

impl<E> Default for MvccList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> MvccList<E> {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MIN_VERSION_CACHE_TTL)
    }

    /// Like `new`, but `free_cb` is invoked with each element's value
    /// the moment its node is actually freed (after `reclaim` confirms
    /// no hazard pointer observes it any longer). Useful for elements
    /// that own resources the caller wants to track being released.
    pub fn new_with_finalizer(free_cb: impl Fn(E) + Send + Sync + 'static) -> Self {
        let mut list = Self::with_config(DEFAULT_MIN_VERSION_CACHE_TTL);
        list.free_cb = Some(Box::new(free_cb));
        list
    }

    /// Like `new`, but with an explicit TTL for the hazard registry's
    /// cached minimum-active-snapshot read (the teacher's tunable
    /// `min_version_cache_time_us`, carried over as a `Duration`).
    /// `reclaim` never consults this cache — it always recomputes fresh,
    /// since a stale-high cached value would let it unlink a tombstone
    /// still visible to a reader that published its snapshot after the
    /// cache was last filled (matching the teacher's `force_flush` path
    /// on its own reclaim entry point). This TTL only bounds the cost of
    /// non-reclaim callers that can tolerate an approximate read.
    pub fn with_config(min_version_cache_ttl: Duration) -> Self {
        MvccList {
            head: AtomicPtr::new(std::ptr::null_mut()),
            commit_counter: AtomicU64::new(0),
            registry: HazardRegistry::new(min_version_cache_ttl),
            free_cb: None,
        }
    }

    fn next_version(&self) -> u64 {
        self.commit_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Push `elm` onto the front of the list.
    pub fn insert_head(&self, elm: E) -> Result<(), Error> {
        self.registry.current_thread_index()?;
        let version = self.next_version();
        let node = Node::alloc(elm, version, std::ptr::null_mut());
        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Append `elm` after the last node, live or tombstoned, in the
    /// chain. Only the node being linked onto needs to be
    /// hazard-protected; unlike `remove`'s predecessor walk this never
    /// CASes a predecessor's `next`, it CASes the target's own.
    pub fn insert_tail(&self, elm: E) -> Result<(), Error> {
        let version = self.next_version();
        let node = Node::alloc(elm, version, std::ptr::null_mut());
        let guard = self.registry.guard(1)?;
        loop {
            let mut curr = guard.protect(&self.head);
            if curr.is_null() {
                if self
                    .head
                    .compare_exchange_weak(std::ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }
            loop {
                let next_cell = unsafe { &(*curr).next };
                let next = next_cell.load(Ordering::Acquire);
                if next.is_null() {
                    if next_cell
                        .compare_exchange_weak(std::ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Ok(());
                    }
                    break;
                }
                curr = guard.protect(next_cell);
            }
        }
    }

    /// Link `elm` directly after the first node whose element compares
    /// equal to `anchor` **and** is visible at the snapshot taken for
    /// this call. A tombstoned node never qualifies as a named anchor,
    /// even though the walk itself keeps traversing through tombstones
    /// to reach later live nodes. Returns `false` if no such node
    /// exists (no node is allocated in that case).
    pub fn insert_after(&self, anchor: &E, elm: E) -> Result<bool, Error>
    where
        E: Eq,
    {
        let version = self.next_version();
        let guard = self.registry.guard(1)?;
        let mut curr = guard.protect(&self.head);
        let mut found: *mut Node<E> = std::ptr::null_mut();
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.is_visible_at(version) && &node.elm == anchor {
                found = curr;
                break;
            }
            curr = guard.protect(&node.next);
        }
        if found.is_null() {
            return Ok(false);
        }
        let target = unsafe { &(*found).next };
        let node = Node::alloc(elm, version, std::ptr::null_mut());
        loop {
            let next = target.load(Ordering::Acquire);
            unsafe { (*node).next.store(next, Ordering::Relaxed) };
            if target
                .compare_exchange_weak(next, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(true);
            }
        }
    }

    /// Tombstone the first node visible "now" (i.e. not already
    /// removed), skipping forward over nodes someone else already
    /// removed. Returns the removed element, or `None` if the list has
    /// no live node.
    pub fn remove_head(&self) -> Result<Option<E>, Error>
    where
        E: Clone,
    {
        let version = self.next_version();
        let guard = self.registry.guard(1)?;
        let mut curr = guard.protect(&self.head);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.mark_removed(version) {
                return Ok(Some(node.elm.clone()));
            }
            curr = guard.protect(&node.next);
        }
        Ok(None)
    }

    /// Tombstone the first live node whose element compares equal to
    /// `elm`. Returns `true` if a node was removed.
    pub fn remove(&self, elm: &E) -> Result<bool, Error>
    where
        E: Eq,
    {
        let version = self.next_version();
        let guard = self.registry.guard(1)?;
        let mut curr = guard.protect(&self.head);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.removed_version() == 0 && &node.elm == elm {
                return Ok(node.mark_removed(version));
            }
            curr = guard.protect(&node.next);
        }
        Ok(false)
    }

    /// True if a live node's element compares equal to `elm`.
    pub fn contains(&self, elm: &E) -> Result<bool, Error>
    where
        E: Eq,
    {
        self.contains_at(elm, u64::MAX)
    }

    pub(crate) fn contains_at(&self, elm: &E, snapshot: u64) -> Result<bool, Error>
    where
        E: Eq,
    {
        let guard = self.registry.guard(1)?;
        let mut curr = guard.protect(&self.head);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.is_visible_at(snapshot) && &node.elm == elm {
                return Ok(true);
            }
            curr = guard.protect(&node.next);
        }
        Ok(false)
    }

    /// Count of live nodes "now". O(n); the list keeps no cached
    /// length, since every insert/remove would then need to agree on a
    /// single linearization point for updating it, defeating the point
    /// of a lock-free design.
    pub fn len(&self) -> Result<usize, Error> {
        let guard = self.registry.guard(1)?;
        let mut curr = guard.protect(&self.head);
        let mut count = 0;
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.removed_version() == 0 {
                count += 1;
            }
            curr = guard.protect(&node.next);
        }
        Ok(count)
    }

    /// Number of distinct threads that have ever called into this list.
    /// Diagnostic only; has no bearing on correctness.
    pub fn thread_count(&self) -> usize {
        self.registry.thread_count()
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        let guard = self.registry.guard(1)?;
        let mut curr = guard.protect(&self.head);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.removed_version() == 0 {
                return Ok(false);
            }
            curr = guard.protect(&node.next);
        }
        Ok(true)
    }

    /// A consistent snapshot over the list as of this call. The
    /// snapshot is published into a hazard slot for the iterator's
    /// lifetime, so the reclaimer will not unlink anything still
    /// visible at it even as the list keeps mutating underneath.
    pub fn iter(&self) -> Result<Iter<'_, E>, Error>
    where
        E: Clone,
    {
        let snapshot = self.commit_counter.load(Ordering::Acquire);
        let snapshot_guard = self.registry.publish_snapshot(snapshot)?;
        let guard = self.registry.guard(1)?;
        let curr = guard.protect(&self.head);
        Ok(Iter {
            _snapshot_guard: snapshot_guard,
            guard,
            snapshot,
            curr,
        })
    }

    /// Begin an optimistic transaction over a snapshot of the list as
    /// of this call. See `Txn` for staging and commit semantics.
    pub fn begin_txn(&self) -> Result<Txn<'_, E>, Error> {
        Txn::start(self)
    }

    /// Attempt to physically unlink and free tombstones no longer
    /// visible to any active snapshot or hazard pointer. Safe to call
    /// from any thread at any time; purely opportunistic bookkeeping,
    /// never required for correctness. `Txn::commit` calls this after
    /// every commit, matching the teacher's `retire`-on-every-`pop`
    /// policy in `lockfree_queue.rs`.
    pub fn reclaim(&self) -> Result<(), Error> {
        let tid = self.registry.current_thread_index()?;
        let min_active = self
            .registry
            .min_active_snapshot_for_reclaim(self.commit_counter.load(Ordering::Acquire));
        self.unlink_tombstones(tid, min_active);
        self.drain_retire_list(tid);
        Ok(())
    }

    fn unlink_tombstones(&self, tid: usize, min_active: u64) {
        let mut cursor = match self.registry.cursor(&self.head) {
            Ok(c) => c,
            Err(_) => return,
        };
        loop {
            if cursor.curr.is_null() {
                return;
            }
            let removed = unsafe { (*cursor.curr).removed_version() };
            if removed != 0 && removed < min_active {
                let victim = cursor.curr;
                let next = unsafe { (*victim).next() };
                if cursor.cas_prev_next(&self.head, victim, next).is_ok() {
                    self.registry.retire(tid, victim);
                }
                cursor.reprotect_curr(&self.head);
                continue;
            }
            if !cursor.advance() {
                return;
            }
        }
    }

    fn drain_retire_list(&self, tid: usize) {
        let pending = self.registry.take_retire_list(tid);
        let mut still_pending = Vec::with_capacity(pending.len());
        for candidate in pending {
            if self.registry.is_hazardous(candidate) {
                still_pending.push(candidate);
            } else {
                unsafe { node::free_node(candidate, &self.free_cb) };
            }
        }
        self.registry.put_back_retire_list(tid, still_pending);
    }
}

impl<E> Drop for MvccList<E> {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let boxed = unsafe { Box::from_raw(curr) };
            curr = boxed.next.load(Ordering::Relaxed);
            if let Some(cb) = &self.free_cb {
                cb(boxed.elm);
            }
        }
        for tid in 0..crate::hazard::MAX_THREAD_COUNT {
            for candidate in self.registry.take_retire_list(tid) {
                let boxed = unsafe { Box::from_raw(candidate) };
                if let Some(cb) = &self.free_cb {
                    cb(boxed.elm);
                }
            }
        }
    }
}

impl<E: fmt::Debug + Clone> fmt::Debug for MvccList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list_fmt = f.debug_list();
        if let Ok(it) = self.iter() {
            list_fmt.entries(it);
        }
        list_fmt.finish()
    }
}

/// A snapshot iterator returned by `MvccList::iter`.
pub struct Iter<'a, E> {
    _snapshot_guard: SnapshotGuard<'a, E>,
    guard: crate::hazard::HazardGuard<'a, E>,
    snapshot: u64,
    curr: *mut Node<E>,
}

impl<E: Clone> Iterator for Iter<'_, E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        while !self.curr.is_null() {
            let node = unsafe { &*self.curr };
            let next = self.guard.protect(&node.next);
            if node.is_visible_at(self.snapshot) {
                let elm = node.elm.clone();
                self.curr = next;
                return Some(elm);
            }
            self.curr = next;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_head_then_iter_sees_lifo_order() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_head(1).unwrap();
        list.insert_head(2).unwrap();
        list.insert_head(3).unwrap();
        let collected: Vec<_> = list.iter().unwrap().collect();
        assert_eq!(collected, vec![3, 2, 1]);
    }

    #[test]
    fn insert_tail_appends_in_order() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        list.insert_tail(3).unwrap();
        let collected: Vec<_> = list.iter().unwrap().collect();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[test]
    fn insert_after_links_directly_behind_anchor() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(3).unwrap();
        assert!(list.insert_after(&1, 2).unwrap());
        let collected: Vec<_> = list.iter().unwrap().collect();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[test]
    fn insert_after_missing_anchor_returns_false() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        assert!(!list.insert_after(&99, 2).unwrap());
    }

    #[test]
    fn insert_after_a_removed_anchor_does_not_match() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        assert!(list.remove(&1).unwrap());
        // `1` is still in the chain as a tombstone, but it is no longer
        // an acceptable anchor.
        assert!(!list.insert_after(&1, 99).unwrap());
        let collected: Vec<_> = list.iter().unwrap().collect();
        assert_eq!(collected, vec![2]);
    }

    #[test]
    fn insert_after_skips_a_tombstoned_duplicate_to_match_the_live_one() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.remove(&1).unwrap();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        assert!(list.insert_after(&1, 99).unwrap());
        let collected: Vec<_> = list.iter().unwrap().collect();
        assert_eq!(collected, vec![1, 99, 2]);
    }

    #[test]
    fn remove_head_pops_front_live_node() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        assert_eq!(list.remove_head().unwrap(), Some(1));
        assert_eq!(list.remove_head().unwrap(), Some(2));
        assert_eq!(list.remove_head().unwrap(), None);
    }

    #[test]
    fn remove_by_identity_tombstones_without_shrinking_storage_immediately() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        assert!(list.remove(&1).unwrap());
        assert!(!list.contains(&1).unwrap());
        assert!(list.contains(&2).unwrap());
        assert_eq!(list.len().unwrap(), 1);
    }

    #[test]
    fn reclaim_unlinks_tombstones_once_unobserved() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        list.remove(&1).unwrap();
        list.reclaim().unwrap();
        // No outstanding snapshot, so the tombstone should be gone from
        // the chain (though this is opportunistic, not guaranteed on
        // every call in the concurrent case).
        assert_eq!(list.len().unwrap(), 1);
        assert!(list.contains(&2).unwrap());
    }

    #[test]
    fn iter_snapshot_ignores_concurrent_mutation() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        let snapshot: Vec<_> = {
            let it = list.iter().unwrap();
            list.insert_tail(3).unwrap();
            list.remove(&1).unwrap();
            it.collect()
        };
        assert_eq!(snapshot, vec![1, 2]);
    }

    #[test]
    fn finalizer_runs_once_a_removed_node_is_reclaimed() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;
        let freed = Arc::new(AtomicUsize::new(0));
        let freed_cb = freed.clone();
        let list = MvccList::new_with_finalizer(move |_: i32| {
            freed_cb.fetch_add(1, Ordering::SeqCst);
        });
        list.insert_tail(1).unwrap();
        list.remove(&1).unwrap();
        list.reclaim().unwrap();
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_count_reflects_distinct_callers() {
        let list: MvccList<i32> = MvccList::new();
        list.insert_head(1).unwrap();
        assert_eq!(list.thread_count(), 1);
        std::thread::scope(|scope| {
            scope.spawn(|| list.insert_head(2).unwrap());
        });
        assert_eq!(list.thread_count(), 2);
    }

    #[test]
    fn reclaim_never_unlinks_a_tombstone_a_fresh_reader_can_still_see() {
        let list: MvccList<i32> = MvccList::with_config(Duration::from_secs(60));
        list.insert_tail(1).unwrap();
        list.insert_tail(2).unwrap();
        // Fill the min-active-snapshot cache with "no readers" before
        // anyone has published a snapshot.
        list.reclaim().unwrap();

        let it = list.iter().unwrap();
        list.remove(&1).unwrap();
        // Within the cache's TTL, and with the reader above still
        // holding an earlier snapshot: reclaim must not trust the stale
        // cached value and unlink the tombstone out from under it.
        list.reclaim().unwrap();
        let seen: Vec<_> = it.collect();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn empty_list_reports_empty() {
        let list: MvccList<i32> = MvccList::new();
        assert!(list.is_empty().unwrap());
        list.insert_head(1).unwrap();
        assert!(!list.is_empty().unwrap());
    }
}
