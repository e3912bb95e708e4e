//! Optional background reclaimer thread.
//!
//! Plays the part of the deferred-work facility: it sleeps on a [`Wakeup`],
//! is poked by `idle()` when calls are pending or by `defer` once the queue
//! passes its threshold, and runs a pass every scan interval regardless. It
//! holds only a weak reference to the domain and exits once the domain
//! is gone.
//!
//! 可选的后台回收线程。它在 [`Wakeup`] 上休眠，有待处理调用时由 `idle()` 唤醒，
//! 队列超过阈值时由 `defer` 唤醒，并且每个扫描间隔都会运行一次扫描。它只持有域的弱引用，域消失后退出。

use crate::sync::{AtomicBool, Ordering, Parker};
use std::time::Duration;

/// Wake-up channel between the domain and its reclaimer thread.
/// 域与其回收线程之间的唤醒通道。
pub(crate) struct Wakeup {
    parker: Parker,
    running: AtomicBool,
    shutdown: AtomicBool,
}

impl Wakeup {
    pub(crate) fn new() -> Self {
        Self {
            parker: Parker::new(),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wake the reclaimer for an immediate pass.
    /// 唤醒回收线程立即运行一次扫描。
    #[inline]
    pub(crate) fn wake(&self) {
        self.parker.unpark_all();
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.parker.unpark_all();
    }
}

#[cfg(not(feature = "loom"))]
pub(crate) fn spawn(
    shared: &crate::sync::Arc<crate::state::SharedState>,
    wakeup: crate::sync::Arc<Wakeup>,
    interval: Duration,
) {
    use crate::sync::Arc;

    let weak = Arc::downgrade(shared);
    wakeup.running.store(true, Ordering::Release);
    let thread_wakeup = Arc::clone(&wakeup);

    let spawned = std::thread::Builder::new()
        .name("smr-reclaimer".into())
        .spawn(move || {
            tracing::debug!(target: "smr", interval_ms = interval.as_millis() as u64, "reclaimer started");
            while !thread_wakeup.shutdown.load(Ordering::Acquire) {
                thread_wakeup.parker.park_timeout(interval);
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.poll(false);
            }
            thread_wakeup.running.store(false, Ordering::Release);
            tracing::debug!(target: "smr", "reclaimer stopped");
        });

    if let Err(err) = spawned {
        wakeup.running.store(false, Ordering::Release);
        tracing::warn!(
            target: "smr",
            error = %err,
            "failed to spawn reclaimer thread, falling back to opportunistic reclamation"
        );
    }
}

#[cfg(feature = "loom")]
pub(crate) fn spawn(
    _shared: &crate::sync::Arc<crate::state::SharedState>,
    _wakeup: crate::sync::Arc<Wakeup>,
    _interval: Duration,
) {
    tracing::warn!(target: "smr", "background reclaimer is not available under loom");
}
