//! A minimal user-space spin lock, used only to serialize first-time
//! thread registration in the hazard registry. Never held across a CAS
//! retry loop or while a hazard pointer is published.

use crate::util;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Keep trying to lock until success.
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            util::pause();
        }
    }

    /// Keep trying to lock until success, then return a guard that
    /// unlocks on drop.
    #[inline]
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard { spin_lock: self }
    }

    /// Unlock. Panics if not currently locked.
    #[inline]
    pub fn unlock(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        assert!(was_locked, "unlock called on a SpinLock that wasn't held");
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Return true if lock was acquired.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

/// Guard of `SpinLock`; unlocks it when dropped.
pub struct SpinLockGuard<'a> {
    spin_lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}
