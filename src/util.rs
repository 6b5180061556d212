//! Small helpers shared across the crate: per-thread ids, a monotonic
//! microsecond clock used to throttle the min-version cache, and a
//! cache-line-aligned wrapper to keep hot atomics from false-sharing.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static GLOBAL_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

/// Returns a small, dense id for the calling thread, assigned on first use.
/// The id never changes for the lifetime of the thread.
pub fn get_thread_id() -> usize {
    THREAD_ID.with(|tid| {
        if let Some(id) = tid.get() {
            return id;
        }
        let id = GLOBAL_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        tid.set(Some(id));
        id
    })
}

#[repr(align(64))]
pub struct WrappedAlign64Type<T>(pub T);

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: Default> Default for WrappedAlign64Type<T> {
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed since this process' first call to this function.
/// Used only to throttle the min-version cache; never compared across
/// processes.
pub fn monotonic_micros() -> u64 {
    let epoch = CLOCK_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as u64
}

#[inline]
pub fn pause() {
    std::hint::spin_loop();
}
