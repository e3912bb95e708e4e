//! The grace-period detector.
//!
//! A pass advances the global epoch, scans every registered context for the
//! oldest epoch still held by an active reader, and runs every deferred call
//! tagged strictly below that epoch.
//!
//! Memory ordering contract, shared with `SmrContext::enter_read` and the
//! lists:
//! - reader: `global_epoch` SeqCst load, slot SeqCst store, SeqCst fence,
//!   then Acquire loads of links;
//! - defer: SeqCst fence (after the writer's Release unlink), then the tag is
//!   a SeqCst load of `global_epoch`;
//! - detector: SeqCst `fetch_add` of `global_epoch`, SeqCst fence, Acquire
//!   loads of slots.
//!
//! 宽限期检测器。一次扫描会推进全局纪元，找出活跃读者仍持有的最旧纪元，
//! 并运行所有标签严格小于该纪元的延迟调用。

use crate::deferred::{Bag, DeferredEntry};
use crate::state::{SharedState, INACTIVE_EPOCH};
use crate::sync::{fence, Arc, AtomicBool, Ordering};
use std::time::Instant;

/// Releases the `scanning` flag when a pass ends, including by unwinding out
/// of a panicking callback.
struct ScanGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ScanGuard<'a> {
    #[inline]
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ScanGuard { flag })
    }
}

impl Drop for ScanGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Expired bags being released by one pass.
///
/// Whatever is still queued in them when this drops, because a callback
/// panicked, goes back to the queue; the panicking call counts as completed.
struct Releasing<'a> {
    shared: &'a SharedState,
    bags: Vec<Bag>,
    in_flight: bool,
}

impl Releasing<'_> {
    fn run(&mut self) -> usize {
        let mut released = 0;
        for bag in self.bags.iter_mut() {
            while let Some(entry) = bag.pop_front() {
                self.in_flight = true;
                entry.run();
                self.in_flight = false;
                self.shared.completed.fetch_add(1, Ordering::Release);
                released += 1;
            }
        }
        released
    }
}

impl Drop for Releasing<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            self.shared.completed.fetch_add(1, Ordering::Release);
        }
        let bags = std::mem::take(&mut self.bags);
        self.shared.queue.lock().restore(bags);
    }
}

impl SharedState {
    /// Number of deferred calls whose callback has not run yet.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        let deferred = self.deferred.load(Ordering::Acquire);
        let completed = self.completed.load(Ordering::Acquire);
        deferred.saturating_sub(completed)
    }

    /// Queue a deferred call tagged with the current epoch.
    ///
    /// Only queues: no callback ever runs on the deferring thread, which
    /// usually holds the writer's lock. Past `auto_reclaim_threshold` the
    /// pass is handed to the reclaimer, or recorded for the next
    /// `idle`/`poll`/`barrier` when there is none.
    ///
    /// The fence orders the caller's unlink before the tag read; see the
    /// module documentation.
    ///
    /// 将延迟调用以当前纪元为标签入队。
    /// 只入队：回调从不在调用 defer 的线程上运行（该线程通常持有写者锁）。
    /// 超过 `auto_reclaim_threshold` 时，扫描交给后台回收线程；
    /// 没有回收线程时记录请求，由下一次 `idle`/`poll`/`barrier` 处理。
    pub(crate) fn defer_entry(&self, entry: DeferredEntry) {
        fence(Ordering::SeqCst);

        let len = {
            let mut queue = self.queue.lock();
            let epoch = self.global_epoch.load(Ordering::SeqCst);
            queue.push(entry, epoch);
            self.deferred.fetch_add(1, Ordering::Release);
            queue.len()
        };

        if let Some(threshold) = self.config.auto_reclaim_threshold {
            if len > threshold {
                self.request_reclaim();
            }
        }
    }

    /// Ask for a pass without running one here.
    ///
    /// 请求一次扫描，但不在当前线程上运行。
    fn request_reclaim(&self) {
        match &self.reclaimer {
            Some(wakeup) if wakeup.is_running() => wakeup.wake(),
            _ => {
                if !self.reclaim_requested.swap(true, Ordering::AcqRel) {
                    tracing::trace!(target: "smr", "reclaim requested");
                }
            }
        }
    }

    /// Run one detector pass.
    ///
    /// Returns `None` without doing anything when another pass is already
    /// running, otherwise the number of callbacks that ran. Without `force`, a
    /// pass over an empty queue returns `Some(0)` without advancing the epoch.
    /// A pass clears any pending reclaim request.
    ///
    /// Never blocks on readers: a context that is still inside a critical
    /// section simply holds back the entries it might observe.
    ///
    /// 运行一次检测扫描。
    /// 如果另一个扫描正在运行则直接返回 `None`，否则返回运行的回调数量。
    /// 不带 `force` 时，空队列上的扫描不推进纪元，直接返回 `Some(0)`。
    /// 扫描会清除待处理的回收请求。
    /// 从不因读者而阻塞：仍在临界区内的上下文只会阻止它可能观察到的条目被释放。
    pub(crate) fn poll(&self, force: bool) -> Option<usize> {
        let _scan = ScanGuard::try_acquire(&self.scanning)?;
        self.reclaim_requested.store(false, Ordering::Release);

        if !force && self.queue.lock().is_empty() {
            return Some(0);
        }

        let new_epoch = self.global_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        fence(Ordering::SeqCst);

        let passes = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let min_active = self.scan_contexts(new_epoch, passes);

        if min_active > self.grace_epoch.load(Ordering::Relaxed) {
            self.grace_epoch.store(min_active, Ordering::Release);
        }

        let bags = self.queue.lock().take_expired(min_active);
        let released = Releasing {
            shared: self,
            bags,
            in_flight: false,
        }
        .run();

        tracing::trace!(
            target: "smr",
            epoch = new_epoch,
            min_active,
            released,
            "grace period pass"
        );

        self.progress.unpark_all();
        Some(released)
    }

    /// Find the oldest epoch still held by an active context.
    ///
    /// Starts from `new_epoch`, so with no active context everything tagged
    /// before this pass is released. Every `cleanup_interval` passes, slots
    /// whose `SmrContext` was dropped are removed from the registry.
    ///
    /// 找出活跃上下文仍持有的最旧纪元。
    /// 从 `new_epoch` 开始，因此没有活跃上下文时，本次扫描之前标记的所有条目都会被释放。
    /// 每隔 `cleanup_interval` 次扫描，移除其 `SmrContext` 已被 drop 的槽。
    fn scan_contexts(&self, new_epoch: usize, passes: usize) -> usize {
        let interval = self.config.cleanup_interval;
        let should_cleanup = interval > 0 && passes % interval == 0;

        let mut min_active_epoch = new_epoch;
        let mut dead_count = 0;

        let mut contexts = self.contexts.lock();

        for slot in contexts.iter() {
            let epoch = slot.active_epoch.load(Ordering::Acquire);
            if epoch != INACTIVE_EPOCH {
                min_active_epoch = min_active_epoch.min(epoch);
            } else if should_cleanup && Arc::strong_count(slot) == 1 {
                // Only the registry holds a reference, the SmrContext was dropped
                dead_count += 1;
            }
        }

        if should_cleanup && dead_count > 0 {
            contexts.retain(|slot| Arc::strong_count(slot) > 1);
            tracing::debug!(
                target: "smr",
                swept = dead_count,
                remaining = contexts.len(),
                "swept dead context slots"
            );
        }

        min_active_epoch
    }

    /// Opportunistic reclamation from a context that is known to be quiescent.
    ///
    /// Hands the work to the background reclaimer when one is running,
    /// otherwise attempts a non-blocking pass on the calling thread. A reclaim
    /// requested by `defer` is honoured here first.
    ///
    /// 来自已知静止上下文的顺带回收：有后台回收线程时交给它，否则在当前线程上
    /// 尝试一次非阻塞扫描。
    pub(crate) fn idle(&self) {
        let requested = self.reclaim_requested.load(Ordering::Acquire);
        if !requested && self.pending() == 0 {
            return;
        }

        match &self.reclaimer {
            Some(wakeup) if wakeup.is_running() => wakeup.wake(),
            _ => {
                self.poll(false);
            }
        }
    }

    /// Drive passes until `done` holds, sleeping `barrier_pause` between them.
    ///
    /// Logs once after `stall_warning` and panics after `stall_timeout` (if
    /// configured): both mean a reader is parked in a critical section.
    ///
    /// 驱动扫描直到 `done` 成立，两次扫描之间休眠 `barrier_pause`。
    /// 超过 `stall_warning` 后记录一次警告，超过 `stall_timeout`（如已配置）后 panic：
    /// 两者都意味着有读者停留在临界区中。
    pub(crate) fn wait_for(&self, op: &'static str, force: bool, mut done: impl FnMut(&Self) -> bool) {
        let start = Instant::now();
        let mut warned = false;

        loop {
            self.poll(force);
            if done(self) {
                return;
            }

            let waited = start.elapsed();
            if !warned && waited >= self.config.stall_warning {
                warned = true;
                tracing::warn!(
                    target: "smr",
                    op,
                    waited_ms = waited.as_millis() as u64,
                    epoch = self.global_epoch.load(Ordering::Relaxed),
                    grace_epoch = self.grace_epoch.load(Ordering::Relaxed),
                    pending = self.pending(),
                    "grace period stalled, a reader may be stuck in a critical section"
                );
            }
            if let Some(limit) = self.config.stall_timeout {
                assert!(
                    waited < limit,
                    "smr: {op} waited {waited:?} for a grace period; \
                     a reader is stuck in a read-side critical section"
                );
            }

            self.progress.park_timeout(self.config.barrier_pause);
        }
    }
}
