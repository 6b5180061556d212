//! A lock-free, MVCC-versioned singly-linked list with hazard-pointer
//! reclamation and optimistic transactions.
//!
//! Every node carries an `insert_version`/`removed_version` pair stamped
//! from a single monotonic commit counter; a node is visible at
//! snapshot `S` iff `insert_version <= S && (removed_version == 0 ||
//! removed_version > S)`. Direct operations (`insert_head`, `remove`,
//! `contains`, ...) act on "now"; `iter` and `Txn` act on a snapshot
//! taken at their start, so concurrent mutation never disturbs a read
//! already in progress. Memory is reclaimed once no hazard pointer or
//! active snapshot can still reach it (`MvccList::reclaim`), following
//! the same acquire/retire/release discipline as this crate's hazard
//! registry (`hazard` module).
//!
//! ```
//! use mvcc_list::MvccList;
//!
//! let list: MvccList<i32> = MvccList::new();
//! list.insert_tail(1).unwrap();
//! list.insert_tail(2).unwrap();
//!
//! let mut txn = list.begin_txn().unwrap();
//! txn.insert_after(1, 99).unwrap();
//! txn.commit().unwrap();
//!
//! let seen: Vec<_> = list.iter().unwrap().collect();
//! assert_eq!(seen, vec![1, 99, 2]);
//! ```

mod error;
mod hazard;
mod list;
mod node;
mod spin_lock;
mod txn;
mod util;

pub use error::Error;
pub use list::{Iter, MvccList};
pub use txn::Txn;
