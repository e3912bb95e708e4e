//! Loom-based concurrency tests
//!
//! These tests use the `loom` library to exhaustively check thread
//! interleavings of the read side against deferral and detector passes.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`

#![cfg(feature = "loom")]

use loom::model::Builder;
use loom::sync::Arc;
use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use loom::thread;
use smr_epoch::{SmrDomain, SmrList, SmrPtr, SmrSList};

/// Test: A node removed while a reader holds it is not reclaimed under it
#[test]
fn loom_removed_node_outlives_reader() {
    loom::model(|| {
        let domain = SmrDomain::builder().auto_reclaim_threshold(None).build();
        let (mut writer, list) = SmrSList::new(&domain);
        writer.insert_tail_locked(1usize);
        let freed = Arc::new(AtomicBool::new(false));

        let reader = {
            let domain = domain.clone();
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                let context = domain.register_context();
                let guard = context.enter_read();
                if let Some(node) = list.first(&guard) {
                    assert_eq!(*node, 1);
                    thread::yield_now();
                    assert!(!freed.load(Ordering::SeqCst));
                }
            })
        };

        let flag = Arc::clone(&freed);
        writer
            .remove_head_locked()
            .unwrap()
            .defer(move |_| flag.store(true, Ordering::SeqCst));
        domain.poll();
        domain.poll();

        reader.join().unwrap();
        domain.barrier();
        assert!(freed.load(Ordering::SeqCst));
    });
}

/// Test: Dropping a nested guard keeps the outer section protecting its nodes
#[test]
fn loom_nested_guard_keeps_protection() {
    loom::model(|| {
        let domain = SmrDomain::builder().auto_reclaim_threshold(None).build();
        let (mut writer, list) = SmrSList::new(&domain);
        writer.insert_tail_locked(7usize);
        let freed = Arc::new(AtomicBool::new(false));

        let reader = {
            let domain = domain.clone();
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                let context = domain.register_context();
                let outer = context.enter_read();
                if let Some(node) = list.first(&outer) {
                    drop(outer.clone());
                    thread::yield_now();
                    assert!(context.in_critical());
                    assert!(!freed.load(Ordering::SeqCst));
                    assert_eq!(*node, 7);
                }
                drop(outer);
                assert!(!context.in_critical());
            })
        };

        let flag = Arc::clone(&freed);
        writer
            .remove_head_locked()
            .unwrap()
            .defer(move |_| flag.store(true, Ordering::SeqCst));
        domain.poll();

        reader.join().unwrap();
        domain.barrier();
        assert!(freed.load(Ordering::SeqCst));
    });
}

/// Test: Concurrent deferrers and overlapping detector passes
#[test]
fn loom_concurrent_defer_and_poll() {
    loom::model(|| {
        let domain = SmrDomain::builder().auto_reclaim_threshold(None).build();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..2 {
            let domain = domain.clone();
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                domain.defer(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                // Either runs a pass or finds the other thread's pass running
                let _ = domain.poll();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        domain.barrier();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let stats = domain.stats();
        assert_eq!(stats.deferred, 2);
        assert_eq!(stats.completed, 2);
    });
}

/// Test: A dropped context does not stall the detector
#[test]
fn loom_context_drop() {
    loom::model(|| {
        let domain = SmrDomain::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let reader = {
            let domain = domain.clone();
            thread::spawn(move || {
                let context = domain.register_context();
                let guard = context.enter_read();
                drop(guard);
                drop(context);
            })
        };

        let c = Arc::clone(&counter);
        domain.defer(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        domain.poll();

        reader.join().unwrap();
        let pending = domain.stats().pending;
        assert_eq!(domain.poll(), Some(pending));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    });
}

/// Test: Doubly-linked list remove during forward and backward reads
#[test]
fn loom_dlist_remove_during_read() {
    let mut builder = Builder::new();
    builder.preemption_bound = Some(3);
    builder.check(|| {
        let domain = SmrDomain::builder().auto_reclaim_threshold(None).build();
        let (mut writer, list) = SmrList::new(&domain);
        for id in 0..3usize {
            writer.insert_tail_locked(id);
        }
        let freed = Arc::new(AtomicBool::new(false));

        let reader = {
            let domain = domain.clone();
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                let context = domain.register_context();
                let guard = context.enter_read();
                for id in list.iter(&guard).rev() {
                    if *id == 1 {
                        assert!(!freed.load(Ordering::SeqCst));
                    }
                }
                if let Some(first) = list.first(&guard) {
                    if let Some(next) = first.next() {
                        assert!(*next == 1 || *next == 2);
                        if *next == 1 {
                            assert!(!freed.load(Ordering::SeqCst));
                        }
                    }
                }
            })
        };

        let flag = Arc::clone(&freed);
        writer
            .remove_locked(|v| *v == 1)
            .unwrap()
            .defer(move |_| flag.store(true, Ordering::SeqCst));
        domain.poll();

        reader.join().unwrap();
        domain.barrier();
        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(writer.len_locked(), 2);
    });
}

/// Test: A replaced pointer value is not reclaimed under a reader
#[test]
fn loom_ptr_set_during_read() {
    loom::model(|| {
        let domain = SmrDomain::builder().auto_reclaim_threshold(None).build();
        let (mut writer, cell) = SmrPtr::new(&domain, Some(Box::new(1usize)));
        let freed = Arc::new(AtomicBool::new(false));

        let reader = {
            let domain = domain.clone();
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                let context = domain.register_context();
                let guard = context.enter_read();
                let value = *cell.get(&guard).unwrap();
                assert!(value == 1 || value == 2);
                if value == 1 {
                    thread::yield_now();
                    assert!(!freed.load(Ordering::SeqCst));
                }
            })
        };

        let flag = Arc::clone(&freed);
        writer
            .set_locked(Box::new(2))
            .unwrap()
            .defer(move |_| flag.store(true, Ordering::SeqCst));
        domain.poll();

        reader.join().unwrap();
        domain.barrier();
        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(writer.get_locked(), Some(&2));
    });
}
