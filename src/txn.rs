//! `Txn<'a, E>`: an optimistic, staged transaction over one snapshot of
//! the list.
//!
//! Every staging call (`insert_head`, `insert_tail`, `insert_after`,
//! `remove`) only mutates the transaction's own buffers; nothing
//! touches the list until `commit`. This gives the transaction a
//! consistent read view (via the snapshot published at `start`) without
//! blocking any other reader or writer, at the cost of a weaker-than-
//! serializable guarantee: `commit` applies the staged operations as
//! ordinary list operations against whatever the list looks like at
//! commit time, not against the snapshot it read from. Two concurrent
//! transactions that both read-then-write the same element can both
//! commit; neither observes the other's write.

use crate::error::Error;
use crate::hazard::SnapshotGuard;
use crate::list::MvccList;
use std::fmt;
use std::sync::atomic::Ordering;

/// A staged, single-thread-affine transaction. Borrow the list for its
/// lifetime; `commit`/`rollback` finalize it, after which any further
/// call returns `Error::TxnAlreadyFinished`.
pub struct Txn<'a, E> {
    list: &'a MvccList<E>,
    snapshot: u64,
    snapshot_guard: Option<SnapshotGuard<'a, E>>,
    head_inserts: Vec<E>,
    tail_inserts: Vec<E>,
    after_inserts: Vec<(E, E)>,
    removes: Vec<E>,
    finished: bool,
}

impl<'a, E> Txn<'a, E> {
    pub(crate) fn start(list: &'a MvccList<E>) -> Result<Self, Error> {
        let snapshot = list.commit_counter.load(Ordering::Acquire);
        let snapshot_guard = list.registry.publish_snapshot(snapshot)?;
        Ok(Txn {
            list,
            snapshot,
            snapshot_guard: Some(snapshot_guard),
            head_inserts: Vec::new(),
            tail_inserts: Vec::new(),
            after_inserts: Vec::new(),
            removes: Vec::new(),
            finished: false,
        })
    }

    /// The snapshot version this transaction reads against.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Stage a head insert. Visible to this transaction's own `contains`
    /// and `foreach` immediately; applied to the list on `commit`.
    pub fn insert_head(&mut self, elm: E) -> Result<(), Error> {
        self.check_open()?;
        self.head_inserts.push(elm);
        Ok(())
    }

    /// Stage a tail insert.
    pub fn insert_tail(&mut self, elm: E) -> Result<(), Error> {
        self.check_open()?;
        self.tail_inserts.push(elm);
        Ok(())
    }

    /// Stage an insert directly after `anchor`. Multiple staged inserts
    /// against the same anchor chain behind one another in staging
    /// order (see `commit`'s anchor-stacking rule), not all directly
    /// behind `anchor`.
    pub fn insert_after(&mut self, anchor: E, elm: E) -> Result<(), Error> {
        self.check_open()?;
        self.after_inserts.push((anchor, elm));
        Ok(())
    }

    /// Cancel a staged insert of `elm` if one exists in this
    /// transaction's buffers; otherwise, if `elm` is live in the list at
    /// this transaction's snapshot, stage its removal. Returns `true` if
    /// either case applied, `false` for a no-op (nothing staged, and
    /// `elm` is not live at the snapshot).
    pub fn remove(&mut self, elm: &E) -> Result<bool, Error>
    where
        E: Eq + Clone,
    {
        self.check_open()?;
        if let Some(pos) = self.head_inserts.iter().position(|e| e == elm) {
            self.head_inserts.remove(pos);
            return Ok(true);
        }
        if let Some(pos) = self.tail_inserts.iter().position(|e| e == elm) {
            self.tail_inserts.remove(pos);
            return Ok(true);
        }
        if let Some(pos) = self.after_inserts.iter().position(|(_, e)| e == elm) {
            self.after_inserts.remove(pos);
            return Ok(true);
        }
        if self.removes.iter().any(|e| e == elm) {
            return Ok(false);
        }
        if self.list.contains_at(elm, self.snapshot)? {
            self.removes.push(elm.clone());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// True if `elm` would be visible to `foreach` right now: staged
    /// (and not cancelled), or live at the snapshot and not staged for
    /// removal.
    pub fn contains(&self, elm: &E) -> Result<bool, Error>
    where
        E: Eq,
    {
        self.check_open()?;
        if self.head_inserts.iter().any(|e| e == elm)
            || self.tail_inserts.iter().any(|e| e == elm)
            || self.after_inserts.iter().any(|(_, e)| e == elm)
        {
            return Ok(true);
        }
        if self.removes.iter().any(|e| e == elm) {
            return Ok(false);
        }
        self.list.contains_at(elm, self.snapshot)
    }

    /// Visit the list as this transaction would see it after a
    /// hypothetical commit with no interleaving: staged head inserts in
    /// LIFO order (latest first), then each node live at the snapshot
    /// and not staged for removal (with every insert staged after it, in
    /// staging order, visited right after), then staged tail inserts in
    /// FIFO order.
    pub fn foreach(&self, mut f: impl FnMut(&E)) -> Result<(), Error>
    where
        E: Eq,
    {
        self.check_open()?;
        for elm in self.head_inserts.iter().rev() {
            f(elm);
        }
        let guard = self.list.registry.guard(1)?;
        let mut curr = guard.protect(&self.list.head);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if node.is_visible_at(self.snapshot) && !self.removes.iter().any(|e| e == &node.elm) {
                f(&node.elm);
                for (anchor, elm) in &self.after_inserts {
                    if anchor == &node.elm {
                        f(elm);
                    }
                }
            }
            curr = guard.protect(&node.next);
        }
        for elm in &self.tail_inserts {
            f(elm);
        }
        Ok(())
    }

    /// Apply every staged operation to the list: removes, then
    /// insert-afters (anchor-stacking: the second and later insert
    /// staged against the same anchor go behind the previously-applied
    /// sibling, not behind the anchor again, so staging order reads
    /// left-to-right in the final list), then tail inserts in staging
    /// order, then head inserts in reverse staging order (so the first
    /// staged head insert ends up nearest the head). Calls `reclaim`
    /// once finished.
    pub fn commit(&mut self) -> Result<(), Error>
    where
        E: Eq + Clone,
    {
        self.check_open()?;
        self.finished = true;

        for elm in self.removes.drain(..) {
            self.list.remove(&elm)?;
        }

        let mut chain_tail: Vec<(E, E)> = Vec::new();
        for (anchor, elm) in self.after_inserts.drain(..) {
            let effective_anchor = chain_tail
                .iter()
                .find(|(a, _)| a == &anchor)
                .map(|(_, tail)| tail.clone())
                .unwrap_or_else(|| anchor.clone());
            self.list.insert_after(&effective_anchor, elm.clone())?;
            match chain_tail.iter_mut().find(|(a, _)| a == &anchor) {
                Some(entry) => entry.1 = elm,
                None => chain_tail.push((anchor, elm)),
            }
        }

        for elm in self.tail_inserts.drain(..) {
            self.list.insert_tail(elm)?;
        }

        for elm in self.head_inserts.drain(..).rev() {
            self.list.insert_head(elm)?;
        }

        self.snapshot_guard = None;
        self.list.reclaim()?;
        Ok(())
    }

    /// Discard every staged operation. The list is left untouched.
    pub fn rollback(&mut self) -> Result<(), Error> {
        self.check_open()?;
        self.finished = true;
        self.head_inserts.clear();
        self.tail_inserts.clear();
        self.after_inserts.clear();
        self.removes.clear();
        self.snapshot_guard = None;
        Ok(())
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.finished {
            Err(Error::TxnAlreadyFinished)
        } else {
            Ok(())
        }
    }
}

impl<E: fmt::Debug + Eq> fmt::Debug for Txn<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut seen = Vec::new();
        let mut list_fmt = f.debug_list();
        if self.foreach(|e| seen.push(format!("{e:?}"))).is_ok() {
            list_fmt.entries(seen);
        }
        list_fmt.finish()
    }
}

impl<E> Drop for Txn<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("transaction dropped without commit or rollback; discarding staged ops");
        }
    }
}
