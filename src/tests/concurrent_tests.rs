/// 并发测试模块
/// 测试宽限期、多读者场景以及 barrier/flush 的阻塞语义
use super::bump;
use crate::{SListWriter, SmrDomain, SmrSList};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// 测试1: 活跃读者阻止回调运行
#[test]
fn test_active_reader_holds_back_callback() {
    let domain = SmrDomain::new();
    let context = domain.register_context();
    let counter = Arc::new(AtomicUsize::new(0));

    let guard = context.enter_read();
    domain.defer(bump(&counter));

    // 读者在注册时活跃，回调不能运行
    assert_eq!(domain.poll(), Some(0));
    assert_eq!(domain.poll(), Some(0));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    drop(guard);
    assert_eq!(domain.poll(), Some(1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// 测试2: 注册之后才进入的读者不会阻止回调
#[test]
fn test_later_reader_does_not_hold_back_callback() {
    let domain = SmrDomain::new();
    let early = domain.register_context();
    let late = domain.register_context();
    let counter = Arc::new(AtomicUsize::new(0));

    let early_guard = early.enter_read();
    domain.defer(bump(&counter));
    assert_eq!(domain.poll(), Some(0));
    drop(early_guard);

    // 纪元已被推进，新读者捕获的纪元严格大于条目的标签
    let _late_guard = late.enter_read();
    assert_eq!(domain.poll(), Some(1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// 测试3: 多个读者线程并发进入/离开，写者并发 defer
#[test]
fn test_concurrent_readers_and_deferrers() {
    let domain = SmrDomain::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = vec![];
    for _ in 0..4 {
        let domain = domain.clone();
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            let context = domain.register_context();
            while !stop.load(Ordering::Relaxed) {
                let guard = context.enter_read();
                std::hint::spin_loop();
                drop(guard);
                context.idle();
            }
        }));
    }

    let mut writers = vec![];
    for _ in 0..3 {
        let domain = domain.clone();
        let counter = Arc::clone(&counter);
        writers.push(thread::spawn(move || {
            for _ in 0..200 {
                domain.defer(bump(&counter));
            }
            domain.barrier();
            // 至少自己的 200 个回调已经运行
            assert!(counter.load(Ordering::SeqCst) >= 200);
        }));
    }

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    domain.barrier();
    assert_eq!(counter.load(Ordering::SeqCst), 600);
}

/// 测试4: barrier 等待另一个线程上的读者离开
#[test]
fn test_barrier_waits_for_reader_on_other_thread() {
    let domain = SmrDomain::new();
    let left = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();

    let reader = {
        let domain = domain.clone();
        let left = Arc::clone(&left);
        thread::spawn(move || {
            let context = domain.register_context();
            let guard = context.enter_read();
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            left.store(true, Ordering::SeqCst);
            drop(guard);
        })
    };

    entered_rx.recv().unwrap();
    let observed = Arc::clone(&left);
    let saw_reader_gone = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&saw_reader_gone);
    domain.defer(move || flag.store(observed.load(Ordering::SeqCst), Ordering::SeqCst));

    domain.barrier();
    assert_eq!(domain.stats().pending, 0);
    assert!(saw_reader_gone.load(Ordering::SeqCst));

    reader.join().unwrap();
}

/// 测试5: flush 等待调用时活跃的读者离开，即使没有待处理的调用
#[test]
fn test_flush_waits_for_reader_without_pending_calls() {
    let domain = SmrDomain::new();
    let left = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();

    let reader = {
        let domain = domain.clone();
        let left = Arc::clone(&left);
        thread::spawn(move || {
            let context = domain.register_context();
            let guard = context.enter_read();
            entered_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            left.store(true, Ordering::SeqCst);
            drop(guard);
        })
    };

    entered_rx.recv().unwrap();
    assert_eq!(domain.stats().pending, 0);

    domain.flush();
    assert!(left.load(Ordering::SeqCst));

    reader.join().unwrap();
}

/// 测试6: 读者从不观察到已交给回调的节点
#[test]
fn test_readers_never_observe_reclaimed_nodes() {
    const IDS: usize = 2_000;

    let domain = SmrDomain::builder().auto_reclaim_threshold(8).build();
    let reclaimed: Arc<Vec<AtomicBool>> = Arc::new((0..IDS).map(|_| AtomicBool::new(false)).collect());
    let (writer, list): (SListWriter<usize>, SmrSList<usize>) = SmrSList::new(&domain);
    let writer = Arc::new(Mutex::new(writer));
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = vec![];
    for _ in 0..4 {
        let domain = domain.clone();
        let list = list.clone();
        let reclaimed = Arc::clone(&reclaimed);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            let context = domain.register_context();
            let mut seen = 0usize;
            while !stop.load(Ordering::Acquire) {
                let guard = context.enter_read();
                for id in list.iter(&guard) {
                    assert!(
                        !reclaimed[*id].load(Ordering::SeqCst),
                        "reader observed node {id} after its callback ran"
                    );
                    seen += 1;
                }
                drop(guard);
                context.idle();
            }
            seen
        }));
    }

    let writer_thread = {
        let writer = Arc::clone(&writer);
        let reclaimed = Arc::clone(&reclaimed);
        thread::spawn(move || {
            for id in 0..IDS {
                let mut w = writer.lock().unwrap();
                w.insert_head_locked(id);
                if id >= 16 {
                    let victim = id - 16;
                    let retired = w.remove_locked(|v| *v == victim).unwrap();
                    let reclaimed = Arc::clone(&reclaimed);
                    retired.defer(move |value| {
                        reclaimed[value].store(true, Ordering::SeqCst);
                    });
                }
            }
        })
    };

    writer_thread.join().unwrap();
    stop.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    domain.barrier();
    let stats = domain.stats();
    assert_eq!(stats.deferred, IDS - 16);
    assert_eq!(stats.completed, IDS - 16);
    assert_eq!(writer.lock().unwrap().len_locked(), 16);
}
