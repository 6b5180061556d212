//! Integration coverage for `Txn`: commit/rollback against a live list,
//! and the weaker-than-serializable guarantee that two transactions
//! started from the same snapshot can both commit without either
//! observing the other's write.

use mvcc_list::MvccList;
use std::sync::Arc;
use std::thread;

#[test]
fn committed_transaction_is_visible_to_later_readers() {
    let list: MvccList<&'static str> = MvccList::new();
    list.insert_tail("a").unwrap();

    let mut txn = list.begin_txn().unwrap();
    txn.insert_tail("b").unwrap();
    txn.insert_after("a", "a.1").unwrap();
    txn.commit().unwrap();

    let seen: Vec<_> = list.iter().unwrap().collect();
    assert_eq!(seen, vec!["a", "a.1", "b"]);
}

#[test]
fn rolled_back_transaction_has_no_effect() {
    let list: MvccList<i32> = MvccList::new();
    list.insert_tail(1).unwrap();

    let mut txn = list.begin_txn().unwrap();
    txn.insert_tail(2).unwrap();
    txn.remove(&1).unwrap();
    txn.rollback().unwrap();

    let seen: Vec<_> = list.iter().unwrap().collect();
    assert_eq!(seen, vec![1]);
}

#[test]
fn dropping_a_transaction_without_finishing_acts_as_rollback() {
    let list: MvccList<i32> = MvccList::new();
    list.insert_tail(1).unwrap();
    {
        let mut txn = list.begin_txn().unwrap();
        txn.insert_tail(2).unwrap();
        // txn dropped here without commit() or rollback()
    }
    let seen: Vec<_> = list.iter().unwrap().collect();
    assert_eq!(seen, vec![1]);
}

#[test]
fn two_transactions_from_the_same_snapshot_can_both_commit() {
    // Neither transaction observes the other's write: this is the
    // documented weaker-than-serializable guarantee, not an accident.
    let list = Arc::new(MvccList::<i32>::new());
    list.insert_tail(1).unwrap();

    let a_list = list.clone();
    let a = thread::spawn(move || {
        let mut txn = a_list.begin_txn().unwrap();
        assert!(!txn.contains(&2).unwrap());
        txn.insert_tail(2).unwrap();
        txn.commit().unwrap();
    });

    let b_list = list.clone();
    let b = thread::spawn(move || {
        let mut txn = b_list.begin_txn().unwrap();
        assert!(!txn.contains(&3).unwrap());
        txn.insert_tail(3).unwrap();
        txn.commit().unwrap();
    });

    a.join().unwrap();
    b.join().unwrap();

    assert!(list.contains(&2).unwrap());
    assert!(list.contains(&3).unwrap());
    assert_eq!(list.len().unwrap(), 3);
}

#[test]
fn remove_on_a_transaction_only_takes_effect_on_commit() {
    let list: MvccList<i32> = MvccList::new();
    list.insert_tail(1).unwrap();

    let mut txn = list.begin_txn().unwrap();
    assert!(txn.remove(&1).unwrap());
    assert!(!txn.contains(&1).unwrap());
    assert!(list.contains(&1).unwrap(), "list must be untouched before commit");

    txn.commit().unwrap();
    assert!(!list.contains(&1).unwrap());
}

#[test]
fn many_sequential_transactions_converge_to_the_expected_state() {
    let list: MvccList<i32> = MvccList::new();
    for round in 0..50 {
        let mut txn = list.begin_txn().unwrap();
        txn.insert_tail(round).unwrap();
        if round > 0 {
            txn.remove(&(round - 1)).unwrap();
        }
        txn.commit().unwrap();
    }
    assert_eq!(list.len().unwrap(), 1);
    assert!(list.contains(&49).unwrap());
}
