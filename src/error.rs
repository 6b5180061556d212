//! Error type for fallible entry points.
//!
//! Most list operations are infallible by design (insert/remove/query
//! report benign outcomes through `bool`/`Option`, never through `Error`
//! — see the module docs on `MvccList`). `Error` only covers the small
//! set of resource-exhaustion conditions spec'd as recoverable: running
//! out of hazard-registry slots and misusing a transaction after it has
//! already finished.

use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// More distinct threads called into the list than the hazard
    /// registry has slots for (`MAX_THREAD_COUNT`, raise it with the
    /// `max_thread_count_256`/`max_thread_count_4096` features).
    #[error("thread count exceeds hazard registry capacity")]
    ThreadNumOverflow,

    /// A transaction was used again after `commit`/`rollback` consumed it.
    #[error("transaction has already committed or rolled back")]
    TxnAlreadyFinished,

    /// Node allocation failed. Rust's global allocator aborts rather than
    /// returning an error on OOM, so this variant exists for interface
    /// completeness with the spec's "insert is fallible" contract and is
    /// not currently produced.
    #[error("allocation failed")]
    AllocationFailed,
}
