//! The hazard registry: per-thread hazard slots plus per-thread
//! active-snapshot slots, as described in spec §4.2. Grounded on the
//! teacher's `HazardEpoch`/`ThreadStore` pair (`hazard_epoch.rs`,
//! `hazard_pointer.rs`), generalized from a single reclamation epoch to
//! the two hazard cells (`prev`/`curr`) plus one MVCC snapshot cell per
//! thread that this list's traversal and transaction code need.

use crate::error::Error;
use crate::node::Node;
use crate::spin_lock::SpinLock;
use crate::util;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(feature = "max_thread_count_4096")] {
        /// Maximum number of distinct threads that may touch a single list.
        pub const MAX_THREAD_COUNT: usize = 4096;
    } else if #[cfg(feature = "max_thread_count_256")] {
        pub const MAX_THREAD_COUNT: usize = 256;
    } else {
        pub const MAX_THREAD_COUNT: usize = 16;
    }
}

/// Two hazard cells per thread: one for the traversal's `prev` node, one
/// for `curr`. Enough for every list operation, which never needs to
/// hold more than a predecessor/successor pair live at once.
const HAZARDS_PER_THREAD: usize = 2;

struct ThreadSlot<E> {
    enabled: AtomicBool,
    hazards: [AtomicPtr<Node<E>>; HAZARDS_PER_THREAD],
    active_snapshot: AtomicU64,
    // Only ever read or written by the thread that owns this slot (the
    // thread whose `get_thread_id()` indexes into it); reclaim() walks
    // every *other* thread's hazard/snapshot cells but never their
    // retire_list, so this doesn't need a lock.
    retire_list: UnsafeCell<Vec<*mut Node<E>>>,
}

impl<E> Default for ThreadSlot<E> {
    fn default() -> Self {
        ThreadSlot {
            enabled: AtomicBool::new(false),
            hazards: [
                AtomicPtr::new(std::ptr::null_mut()),
                AtomicPtr::new(std::ptr::null_mut()),
            ],
            active_snapshot: AtomicU64::new(0),
            retire_list: UnsafeCell::new(Vec::new()),
        }
    }
}

// SAFETY: `hazards`/`active_snapshot`/`enabled` are atomics (Sync by
// construction). `retire_list` is read/written exclusively by the slot's
// owning thread, via `HazardRegistry::retire`/`take_retire_list`/
// `put_back_retire_list`, all of which take that thread's own `tid`.
unsafe impl<E: Send> Sync for ThreadSlot<E> {}

struct MinVersionCache {
    value: u64,
    at_micros: u64,
}

/// Fixed-capacity table of per-thread hazard state, shared by all
/// operations on one `MvccList`.
pub(crate) struct HazardRegistry<E> {
    slots: Box<[ThreadSlot<E>]>,
    registration_lock: SpinLock,
    thread_count: AtomicUsize,
    min_version_cache: Mutex<MinVersionCache>,
    min_version_cache_ttl: Duration,
}

impl<E> HazardRegistry<E> {
    pub(crate) fn new(min_version_cache_ttl: Duration) -> Self {
        let mut slots = Vec::with_capacity(MAX_THREAD_COUNT);
        slots.resize_with(MAX_THREAD_COUNT, ThreadSlot::default);
        HazardRegistry {
            slots: slots.into_boxed_slice(),
            registration_lock: SpinLock::default(),
            thread_count: AtomicUsize::new(0),
            min_version_cache: Mutex::new(MinVersionCache {
                value: 0,
                at_micros: 0,
            }),
            min_version_cache_ttl,
        }
    }

    /// Resolve (and lazily register) the calling thread's slot index.
    pub(crate) fn current_thread_index(&self) -> Result<usize, Error> {
        let tid = util::get_thread_id();
        if tid >= MAX_THREAD_COUNT {
            log::warn!(
                "thread id {} exceeds hazard registry capacity {}",
                tid,
                MAX_THREAD_COUNT
            );
            return Err(Error::ThreadNumOverflow);
        }
        let slot = &self.slots[tid];
        if !slot.enabled.load(Ordering::Acquire) {
            let _guard = self.registration_lock.lock_guard();
            if !slot.enabled.load(Ordering::Acquire) {
                slot.enabled.store(true, Ordering::Release);
                self.thread_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(tid)
    }

    fn slot(&self, tid: usize) -> &ThreadSlot<E> {
        &self.slots[tid]
    }

    /// Number of distinct threads that have ever called into this
    /// registry. Exposed for diagnostics only.
    pub(crate) fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Relaxed)
    }

    /// Borrow a RAII hazard guard over cell `idx` (0 or 1) for the
    /// calling thread. The cell is cleared when the guard drops.
    pub(crate) fn guard(&self, idx: usize) -> Result<HazardGuard<'_, E>, Error> {
        let tid = self.current_thread_index()?;
        Ok(HazardGuard {
            registry: self,
            tid,
            idx,
        })
    }

    /// Publish `snapshot` into the calling thread's active-snapshot
    /// cell, preventing the reclaimer from unlinking anything still
    /// visible at that version. Returns a guard that clears the cell on
    /// drop.
    pub(crate) fn publish_snapshot(&self, snapshot: u64) -> Result<SnapshotGuard<'_, E>, Error> {
        let tid = self.current_thread_index()?;
        self.slot(tid).active_snapshot.store(snapshot, Ordering::Release);
        Ok(SnapshotGuard { registry: self, tid })
    }

    /// Minimum nonzero active-snapshot value across every registered
    /// thread, or `u64::MAX` if none is active. Cached briefly for
    /// callers that can tolerate a slightly stale (but never too
    /// *high*) answer; `reclaim` must instead call
    /// `min_active_snapshot_for_reclaim`, which always recomputes fresh.
    #[cfg(test)]
    pub(crate) fn min_active_snapshot(&self, fallback: u64) -> u64 {
        let now = util::monotonic_micros();
        {
            let cache = self.min_version_cache.lock().unwrap();
            if now.saturating_sub(cache.at_micros) < self.min_version_cache_ttl.as_micros() as u64
                && cache.value != 0
            {
                return cache.value;
            }
        }
        self.recompute_min_active_snapshot(fallback, now)
    }

    /// Fresh (never cached) minimum active-snapshot read, for the one
    /// caller — `reclaim` — that must never unlink a node still visible
    /// to a snapshot published after the cache was last filled. The
    /// time-throttled cache in `min_active_snapshot` can only ever be
    /// stale *low*, not *high*, for every other caller, but `reclaim` is
    /// the one place a stale-high answer would let a tombstone be
    /// physically unlinked out from under a live reader, so it bypasses
    /// the cache entirely, matching the teacher's `force_flush` path on
    /// its own reclaim entry point.
    pub(crate) fn min_active_snapshot_for_reclaim(&self, fallback: u64) -> u64 {
        let now = util::monotonic_micros();
        self.recompute_min_active_snapshot(fallback, now)
    }

    fn recompute_min_active_snapshot(&self, fallback: u64, now: u64) -> u64 {
        let mut min = fallback;
        for slot in self.slots.iter() {
            if !slot.enabled.load(Ordering::Acquire) {
                continue;
            }
            let v = slot.active_snapshot.load(Ordering::Acquire);
            if v != 0 && v < min {
                min = v;
            }
        }
        let mut cache = self.min_version_cache.lock().unwrap();
        cache.value = min;
        cache.at_micros = now;
        min
    }

    /// True if any registered thread's hazard cell currently points at
    /// `ptr`.
    pub(crate) fn is_hazardous(&self, ptr: *mut Node<E>) -> bool {
        if ptr.is_null() {
            return false;
        }
        self.slots.iter().any(|slot| {
            slot.enabled.load(Ordering::Acquire)
                && slot
                    .hazards
                    .iter()
                    .any(|h| h.load(Ordering::Acquire) == ptr)
        })
    }

    /// Push `node` onto the calling thread's retire list, to be retried
    /// on a future reclaim pass.
    pub(crate) fn retire(&self, tid: usize, node: *mut Node<E>) {
        // SAFETY: only the owning thread calls this, with its own tid.
        unsafe { (*self.slot(tid).retire_list.get()).push(node) };
    }

    /// Drain the calling thread's retire list so the caller can re-check
    /// each node against the current hazard set.
    pub(crate) fn take_retire_list(&self, tid: usize) -> Vec<*mut Node<E>> {
        // SAFETY: only the owning thread calls this, with its own tid.
        unsafe { std::mem::take(&mut *self.slot(tid).retire_list.get()) }
    }

    pub(crate) fn put_back_retire_list(&self, tid: usize, mut nodes: Vec<*mut Node<E>>) {
        // SAFETY: only the owning thread calls this, with its own tid.
        unsafe { (*self.slot(tid).retire_list.get()).append(&mut nodes) };
    }

    /// Load `src`, publish it into `tid`'s cell `idx`, then re-check `src`
    /// is unchanged. Shared by `HazardGuard::protect` and `PrevCurrCursor`.
    fn protect_into(&self, tid: usize, idx: usize, src: &AtomicPtr<Node<E>>) -> *mut Node<E> {
        loop {
            let p = src.load(Ordering::Acquire);
            self.slot(tid).hazards[idx].store(p, Ordering::Release);
            if src.load(Ordering::Acquire) == p {
                return p;
            }
        }
    }

    fn clear_cell(&self, tid: usize, idx: usize) {
        self.slot(tid).hazards[idx].store(std::ptr::null_mut(), Ordering::Release);
    }

    /// Open a two-hazard prev/curr cursor over the calling thread's
    /// cells, anchored at `head`. Used by the walks that must CAS a
    /// predecessor's `next` field (the head-tombstone skip in
    /// `remove_head`, and the reclaimer's physical unlink), where both
    /// the node being examined and the node whose `next` will be CAS'd
    /// must stay hazard-protected at once.
    pub(crate) fn cursor(&self, head: &AtomicPtr<Node<E>>) -> Result<PrevCurrCursor<'_, E>, Error> {
        let tid = self.current_thread_index()?;
        let curr = self.protect_into(tid, 1, head);
        Ok(PrevCurrCursor {
            registry: self,
            tid,
            prev_idx: 0,
            curr_idx: 1,
            prev: std::ptr::null_mut(),
            curr,
        })
    }
}

pub(crate) struct HazardGuard<'a, E> {
    registry: &'a HazardRegistry<E>,
    tid: usize,
    idx: usize,
}

impl<'a, E> HazardGuard<'a, E> {
    /// Load `src`, publish it into this guard's hazard cell, then
    /// re-check `src` is unchanged. Retries until the published pointer
    /// is confirmed stable, which is the standard hazard-pointer
    /// protect-then-validate sequence.
    pub(crate) fn protect(&self, src: &AtomicPtr<Node<E>>) -> *mut Node<E> {
        self.registry.protect_into(self.tid, self.idx, src)
    }

    pub(crate) fn clear(&self) {
        self.registry.clear_cell(self.tid, self.idx);
    }
}

impl<E> Drop for HazardGuard<'_, E> {
    fn drop(&mut self) {
        self.clear();
    }
}

pub(crate) struct SnapshotGuard<'a, E> {
    registry: &'a HazardRegistry<E>,
    tid: usize,
}

impl<E> Drop for SnapshotGuard<'_, E> {
    fn drop(&mut self) {
        self.registry.slot(self.tid).active_snapshot.store(0, Ordering::Release);
    }
}

/// A two-hazard walk over the list: `prev` and `curr` stay protected
/// simultaneously, `prev` null meaning "the walk hasn't advanced past
/// the list head yet". `advance` shifts `curr` into `prev`'s cell and
/// protects the next node into the cell `prev` just vacated, so both
/// stay live across the swap. `cas_prev_next` targets whichever atomic
/// cell `prev` currently owns.
pub(crate) struct PrevCurrCursor<'a, E> {
    registry: &'a HazardRegistry<E>,
    tid: usize,
    prev_idx: usize,
    curr_idx: usize,
    pub(crate) prev: *mut Node<E>,
    pub(crate) curr: *mut Node<E>,
}

impl<E> PrevCurrCursor<'_, E> {
    /// Re-anchor at `head`, discarding the current `prev`. Used to
    /// restart a walk after a lost CAS race.
    pub(crate) fn reset(&mut self, head: &AtomicPtr<Node<E>>) {
        self.registry.clear_cell(self.tid, self.prev_idx);
        self.prev = std::ptr::null_mut();
        self.curr = self.registry.protect_into(self.tid, self.curr_idx, head);
    }

    /// Re-protect `curr`'s cell from whichever atomic `prev` currently
    /// owns (`head` if `prev` is null, else `prev.next`), without moving
    /// `prev` forward. Used after a tombstone unlink (successful or
    /// lost) to pick up the live value at that cell and retry.
    pub(crate) fn reprotect_curr(&mut self, head: &AtomicPtr<Node<E>>) {
        let src: *const AtomicPtr<Node<E>> = if self.prev.is_null() {
            head
        } else {
            unsafe { &(*self.prev).next }
        };
        self.curr = self.registry.protect_into(self.tid, self.curr_idx, unsafe { &*src });
    }

    /// Move forward one node. Returns `false` if `curr` was already null.
    pub(crate) fn advance(&mut self) -> bool {
        if self.curr.is_null() {
            return false;
        }
        let next_atomic = unsafe { &(*self.curr).next };
        std::mem::swap(&mut self.prev_idx, &mut self.curr_idx);
        self.prev = self.curr;
        self.curr = self.registry.protect_into(self.tid, self.curr_idx, next_atomic);
        true
    }

    /// CAS the atomic cell `prev` owns (`head` if `prev` is null, else
    /// `prev.next`) from `expected` to `new`.
    pub(crate) fn cas_prev_next(
        &self,
        head: &AtomicPtr<Node<E>>,
        expected: *mut Node<E>,
        new: *mut Node<E>,
    ) -> Result<*mut Node<E>, *mut Node<E>> {
        if self.prev.is_null() {
            head.compare_exchange(expected, new, Ordering::Release, Ordering::Acquire)
        } else {
            unsafe {
                (*self.prev)
                    .next
                    .compare_exchange(expected, new, Ordering::Release, Ordering::Acquire)
            }
        }
    }
}

impl<E> Drop for PrevCurrCursor<'_, E> {
    fn drop(&mut self) {
        self.registry.clear_cell(self.tid, 0);
        self.registry.clear_cell(self.tid, 1);
    }
}
