use crate::context::SmrContext;
use crate::deferred::DeferredEntry;
use crate::reclaimer::{self, Wakeup};
use crate::state::{
    DomainConfig, SharedState, AUTO_RECLAIM_THRESHOLD, DEFAULT_BARRIER_PAUSE,
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_STALL_WARNING,
};
use crate::sync::{fence, Arc, Ordering};
use std::boxed::Box;
use std::time::Duration;

/// Builder for configuring an `SmrDomain`.
///
/// Use this builder to customize reclamation behavior:
/// - `auto_reclaim_threshold`: queue length at which `defer` requests a pass
/// - `cleanup_interval`: how often dead context slots are swept
/// - `barrier_pause`: sleep between passes of a blocked `barrier`/`flush`
/// - `stall_warning` / `stall_timeout`: diagnostics for stuck readers
/// - `background_reclaimer`: run passes on a dedicated thread
///
/// # Example
/// ```
/// use smr_epoch::SmrDomain;
/// use std::time::Duration;
///
/// let domain = SmrDomain::builder()
///     .auto_reclaim_threshold(128)
///     .cleanup_interval(32)
///     .stall_timeout(Duration::from_secs(30))
///     .build();
/// ```
///
/// 用于配置 `SmrDomain` 的构建器。
pub struct SmrDomainBuilder {
    auto_reclaim_threshold: Option<usize>,
    cleanup_interval: usize,
    barrier_pause: Duration,
    stall_warning: Duration,
    stall_timeout: Option<Duration>,
    reclaimer_interval: Option<Duration>,
}

impl SmrDomainBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            auto_reclaim_threshold: Some(AUTO_RECLAIM_THRESHOLD),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            barrier_pause: DEFAULT_BARRIER_PAUSE,
            stall_warning: DEFAULT_STALL_WARNING,
            stall_timeout: None,
            reclaimer_interval: None,
        }
    }

    /// Set the automatic reclamation threshold.
    ///
    /// When the pending queue grows past this length, `defer` wakes the
    /// background reclaimer, or marks a pass as requested for the next
    /// `idle`/`poll`/`barrier`. `defer` itself never runs callbacks.
    /// Pass `None` to disable.
    ///
    /// Default: `Some(64)`
    ///
    /// 设置自动回收阈值。
    /// 当待处理队列长度超过此值时，`defer` 会唤醒后台回收线程，
    /// 或标记一次扫描请求，由下一次 `idle`/`poll`/`barrier` 处理。`defer` 本身从不运行回调。
    /// 传递 `None` 可禁用。
    #[inline]
    pub fn auto_reclaim_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.auto_reclaim_threshold = threshold.into();
        self
    }

    /// Set the cleanup interval for dead context slots.
    ///
    /// Dead slots are swept every N detector passes to reduce overhead.
    /// Set to `0` to disable periodic cleanup (not recommended).
    ///
    /// Default: `16`
    ///
    /// 设置死上下文槽的清理间隔。
    /// 死槽每 N 次检测扫描清理一次，以减少开销。
    /// 设置为 `0` 可禁用定期清理（不推荐）。
    #[inline]
    pub fn cleanup_interval(mut self, interval: usize) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set how long a blocked `barrier`/`flush` sleeps between passes.
    ///
    /// Default: 1 ms
    ///
    /// 设置阻塞的 `barrier`/`flush` 两次扫描之间的休眠时间。
    #[inline]
    pub fn barrier_pause(mut self, pause: Duration) -> Self {
        self.barrier_pause = pause;
        self
    }

    /// Set the wait after which a blocked `barrier`/`flush` logs a warning.
    ///
    /// Default: 1 s
    ///
    /// 设置阻塞的 `barrier`/`flush` 在等待多久之后记录警告。
    #[inline]
    pub fn stall_warning(mut self, after: Duration) -> Self {
        self.stall_warning = after;
        self
    }

    /// Set the wait after which a blocked `barrier`/`flush` panics.
    ///
    /// A reader that never leaves its critical section wedges reclamation;
    /// this turns the hang into a loud failure. Default: `None` (wait forever).
    ///
    /// 设置阻塞的 `barrier`/`flush` 在等待多久之后 panic。
    /// 永不离开临界区的读者会卡住回收；此选项把挂起变成明确的失败。
    #[inline]
    pub fn stall_timeout(mut self, limit: impl Into<Option<Duration>>) -> Self {
        self.stall_timeout = limit.into();
        self
    }

    /// Run detector passes on a background thread every `interval`.
    ///
    /// `idle()` and a `defer` past the threshold then wake that thread.
    /// Default: `None` (reclamation is opportunistic and forced by waiters).
    ///
    /// 每隔 `interval` 在后台线程上运行检测扫描。
    /// 此时 `idle()` 和超过阈值的 `defer` 会唤醒该线程。
    #[inline]
    pub fn background_reclaimer(mut self, interval: impl Into<Option<Duration>>) -> Self {
        self.reclaimer_interval = interval.into();
        self
    }

    /// Build the `SmrDomain` with the configured settings.
    /// 使用配置的设置构建 `SmrDomain`。
    pub fn build(self) -> SmrDomain {
        let config = DomainConfig {
            auto_reclaim_threshold: self.auto_reclaim_threshold,
            cleanup_interval: self.cleanup_interval,
            barrier_pause: self.barrier_pause,
            stall_warning: self.stall_warning,
            stall_timeout: self.stall_timeout,
        };

        let wakeup = self.reclaimer_interval.map(|_| Arc::new(Wakeup::new()));
        let shared = Arc::new(SharedState::new(config, wakeup.clone()));

        if let (Some(wakeup), Some(interval)) = (wakeup, self.reclaimer_interval) {
            reclaimer::spawn(&shared, wakeup, interval);
        }

        SmrDomain { shared }
    }
}

impl Default for SmrDomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of a domain's counters.
/// 域计数器的快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmrStats {
    /// Current global epoch.
    pub epoch: usize,
    /// Every reader that captured an epoch below this one has left.
    pub grace_epoch: usize,
    /// Registered context slots (dead slots count until swept).
    pub contexts: usize,
    /// Deferred calls whose callback has not run yet.
    pub pending: usize,
    /// Deferred calls ever registered.
    pub deferred: usize,
    /// Deferred calls whose callback has run.
    pub completed: usize,
    /// Detector passes that advanced the epoch.
    pub passes: usize,
}

/// A safe memory reclamation domain.
///
/// `SmrDomain` is the entry point of the subsystem. It manages:
/// - The global epoch counter.
/// - Registration of execution contexts.
/// - The queue of deferred calls and the grace-period detector.
///
/// `SmrDomain` is `Clone` and can be safely shared across threads. Any thread
/// may defer calls; writers serialize among themselves with their own lock.
///
/// **Typical Usage**:
/// ```
/// use smr_epoch::SmrDomain;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let domain = SmrDomain::new();
/// let context = domain.register_context();
///
/// {
///     let _guard = context.enter_read();
///     // read SMR-protected data...
/// }
///
/// let freed = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&freed);
/// domain.defer(move || {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
/// domain.barrier();
/// assert_eq!(freed.load(Ordering::Relaxed), 1);
/// ```
///
/// 安全内存回收域。
/// `SmrDomain` 是该子系统的入口点。它管理：
/// - 全局纪元计数器。
/// - 执行上下文的注册。
/// - 延迟调用队列和宽限期检测器。
/// `SmrDomain` 是 `Clone` 的，可以安全地在线程间共享。
#[derive(Clone)]
pub struct SmrDomain {
    pub(crate) shared: Arc<SharedState>,
}

impl SmrDomain {
    /// Create a new SMR domain with default settings.
    /// 使用默认设置创建一个新的 SMR 域。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring the domain.
    /// 创建一个用于配置域的构建器。
    #[inline]
    pub fn builder() -> SmrDomainBuilder {
        SmrDomainBuilder::new()
    }

    /// Register a new execution context.
    ///
    /// Returns an `SmrContext` that should be stored per-thread.
    /// The caller is responsible for ensuring that each `SmrContext` is used
    /// by only one thread at a time.
    ///
    /// 注册一个新的执行上下文。
    /// 返回一个应该在每个线程中存储的 `SmrContext`。
    #[inline]
    pub fn register_context(&self) -> SmrContext {
        SmrContext::new(self.shared.clone())
    }

    /// Defer `callback(arg)` until every reader active now has left.
    ///
    /// Returns immediately; the callback never runs on this call's stack
    /// frame. Ownership of `arg` moves into the queue and then into the
    /// callback.
    ///
    /// 延迟 `callback(arg)`，直到当前所有活跃读者都已离开。
    /// 立即返回；回调永远不会在本次调用中同步运行。
    /// `arg` 的所有权先移入队列，再移入回调。
    #[inline]
    pub fn defer_call<T: Send + 'static>(&self, arg: T, callback: fn(T)) {
        self.defer(move || callback(arg));
    }

    /// Defer a closure until every reader active now has left.
    ///
    /// Only queues the closure: no callback, this one or an earlier one, runs
    /// on the calling thread, so it is safe to call with the writer's lock held.
    ///
    /// 延迟一个闭包，直到当前所有活跃读者都已离开。
    /// 只入队：任何回调（包括更早入队的）都不会在调用线程上运行，因此可以在持有写者锁时调用。
    #[inline]
    pub fn defer<F: FnOnce() + Send + 'static>(&self, callback: F) {
        self.shared.defer_entry(DeferredEntry::new(callback));
    }

    /// Defer dropping `data` until every reader active now has left.
    /// 延迟 drop `data`，直到当前所有活跃读者都已离开。
    #[inline]
    pub fn retire<T: Send + 'static>(&self, data: Box<T>) {
        self.defer(move || drop(data));
    }

    /// Run one grace-period detector pass.
    ///
    /// Returns `None` if another pass was already running, otherwise the
    /// number of deferred callbacks that ran. Never waits for readers.
    ///
    /// 运行一次宽限期检测扫描。
    /// 如果已有扫描在运行则返回 `None`，否则返回运行的延迟回调数量。从不等待读者。
    #[inline]
    pub fn poll(&self) -> Option<usize> {
        self.shared.poll(false)
    }

    /// Block until every call deferred before this one has run.
    ///
    /// Returns immediately when nothing is pending. Must not be called from
    /// inside a read-side critical section or a deferred callback.
    ///
    /// 阻塞直到此调用之前延迟的所有调用都已运行。
    /// 没有待处理调用时立即返回。不得在读侧临界区或延迟回调中调用。
    pub fn barrier(&self) {
        let target = self.shared.deferred.load(Ordering::Acquire);
        if self.shared.completed.load(Ordering::Acquire) >= target {
            return;
        }

        self.shared.wait_for("barrier", false, |shared| {
            shared.completed.load(Ordering::Acquire) >= target
        });
    }

    /// Block until every reader active at the time of the call has left its
    /// critical section, and every call deferred before this one has run.
    ///
    /// Unlike `barrier`, this forces an epoch advance even when nothing is
    /// pending.
    ///
    /// 阻塞直到调用时活跃的所有读者都已离开临界区，且此调用之前延迟的所有调用都已运行。
    /// 与 `barrier` 不同，即使没有待处理调用，它也会强制推进纪元。
    pub fn flush(&self) {
        fence(Ordering::SeqCst);
        let epoch = self.shared.global_epoch.load(Ordering::SeqCst);
        let target = self.shared.deferred.load(Ordering::Acquire);

        self.shared.wait_for("flush", true, |shared| {
            shared.grace_epoch.load(Ordering::Acquire) > epoch
                && shared.completed.load(Ordering::Acquire) >= target
        });
    }

    /// Snapshot the domain's counters.
    /// 获取域计数器的快照。
    pub fn stats(&self) -> SmrStats {
        let shared = &self.shared;
        let deferred = shared.deferred.load(Ordering::Acquire);
        let completed = shared.completed.load(Ordering::Acquire);
        SmrStats {
            epoch: shared.global_epoch.load(Ordering::Acquire),
            grace_epoch: shared.grace_epoch.load(Ordering::Acquire),
            contexts: shared.contexts.lock().len(),
            pending: deferred.saturating_sub(completed),
            deferred,
            completed,
            passes: shared.passes.load(Ordering::Relaxed),
        }
    }
}

impl Default for SmrDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SmrDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmrDomain").field("stats", &self.stats()).finish()
    }
}
