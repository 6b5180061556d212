//! Multi-threaded stress coverage for `MvccList`, grounded in the
//! teacher's producer/consumer shape (`test_lockfree_queue.rs`):
//! several writer threads hammer the list while a reader thread takes
//! repeated snapshots, and we check the invariants that must survive
//! arbitrary interleaving rather than any particular schedule.

use mvcc_list::MvccList;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn set_cpu_affinity(tid: usize) {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            core_affinity::set_for_current(cpus[tid % cpus.len()]);
        }
    }
}

#[test]
fn concurrent_inserts_and_removes_preserve_membership() {
    let _ = env_logger::builder().is_test(true).try_init();

    let list = Arc::new(MvccList::<u64>::new());
    const PER_THREAD: u64 = 2_000;
    const WRITERS: u64 = 4;

    let mut writers = Vec::new();
    for w in 0..WRITERS {
        let list = list.clone();
        writers.push(thread::spawn(move || {
            set_cpu_affinity(w as usize);
            let base = w * PER_THREAD;
            for i in 0..PER_THREAD {
                list.insert_tail(base + i).unwrap();
            }
        }));
    }
    for t in writers {
        t.join().unwrap();
    }

    assert_eq!(list.len().unwrap() as u64, WRITERS * PER_THREAD);
    for w in 0..WRITERS {
        for i in 0..PER_THREAD {
            assert!(list.contains(&(w * PER_THREAD + i)).unwrap());
        }
    }

    let removed = Arc::new(AtomicUsize::new(0));
    let mut removers = Vec::new();
    for w in 0..WRITERS {
        let list = list.clone();
        let removed = removed.clone();
        removers.push(thread::spawn(move || {
            let base = w * PER_THREAD;
            for i in 0..PER_THREAD {
                if list.remove(&(base + i)).unwrap() {
                    removed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for t in removers {
        t.join().unwrap();
    }

    assert_eq!(removed.load(Ordering::Relaxed) as u64, WRITERS * PER_THREAD);
    assert!(list.is_empty().unwrap());

    list.reclaim().unwrap();
    assert!(list.is_empty().unwrap());
}

#[test]
fn reader_snapshot_is_stable_while_writers_race() {
    let list = Arc::new(MvccList::<u64>::new());
    for i in 0..100 {
        list.insert_tail(i).unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let writer_list = list.clone();
    let writer_stop = stop.clone();
    let writer = thread::spawn(move || {
        let mut next = 100;
        while !writer_stop.load(Ordering::Relaxed) {
            writer_list.insert_tail(next).unwrap();
            writer_list.remove(&next).unwrap();
            next += 1;
        }
    });

    for _ in 0..50 {
        let snapshot: Vec<_> = list.iter().unwrap().collect();
        assert!(snapshot.len() >= 100, "snapshot dropped pre-existing elements: {snapshot:?}");
        assert_eq!(&snapshot[..100], &(0..100u64).collect::<Vec<_>>()[..]);
    }

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
}

#[test]
fn reclaim_eventually_frees_every_tombstone() {
    use std::sync::atomic::AtomicUsize;

    let freed = Arc::new(AtomicUsize::new(0));
    let freed_cb = freed.clone();
    let list = MvccList::new_with_finalizer(move |_: u64| {
        freed_cb.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..200 {
        list.insert_tail(i).unwrap();
    }
    for i in 0..200 {
        assert!(list.remove(&i).unwrap());
    }
    list.reclaim().unwrap();

    assert_eq!(freed.load(Ordering::SeqCst), 200);
    assert!(list.is_empty().unwrap());
}
