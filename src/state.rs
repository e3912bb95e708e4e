use crate::deferred::DeferredQueue;
use crate::reclaimer::Wakeup;
use crate::sync::{Arc, AtomicBool, AtomicUsize, Mutex, Parker};
use std::time::Duration;
use std::vec::Vec;

/// Default queue length above which `defer` requests a detector pass.
/// 队列长度超过此默认值时，`defer` 会请求一次检测扫描。
pub(crate) const AUTO_RECLAIM_THRESHOLD: usize = 64;

/// Default interval for sweeping dead context slots (in detector passes).
/// 清理死上下文槽的默认间隔（以检测扫描次数为单位）。
pub(crate) const DEFAULT_CLEANUP_INTERVAL: usize = 16;

/// Default sleep between two passes of a blocked `barrier`/`flush`.
/// 阻塞中的 `barrier`/`flush` 两次扫描之间的默认休眠时间。
pub(crate) const DEFAULT_BARRIER_PAUSE: Duration = Duration::from_millis(1);

/// Default wait after which a blocked `barrier`/`flush` logs a stall warning.
/// 阻塞中的 `barrier`/`flush` 记录停滞警告之前的默认等待时间。
pub(crate) const DEFAULT_STALL_WARNING: Duration = Duration::from_secs(1);

/// Represents a context that is not inside a read-side critical section.
/// 表示当前不在读侧临界区内的上下文。
pub(crate) const INACTIVE_EPOCH: usize = usize::MAX;

/// Per-execution-context state: the epoch captured by `enter_read`, or
/// `INACTIVE_EPOCH` while quiescent.
///
/// Written only by the owning `SmrContext`, read by the detector.
/// Cache-aligned to prevent false sharing between contexts.
///
/// 每个执行上下文的状态：`enter_read` 捕获的纪元，静止时为 `INACTIVE_EPOCH`。
/// 只由拥有它的 `SmrContext` 写入，由检测器读取。
/// 缓存对齐以防止上下文之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct ContextSlot {
    pub(crate) active_epoch: AtomicUsize,
}

impl ContextSlot {
    pub(crate) fn new() -> Self {
        Self {
            active_epoch: AtomicUsize::new(INACTIVE_EPOCH),
        }
    }
}

/// Tunables fixed at `build()` time.
/// 在 `build()` 时确定的可调参数。
#[derive(Debug, Clone)]
pub(crate) struct DomainConfig {
    /// Queue length above which `defer` requests a pass; `None` disables it.
    /// 超过此队列长度时 `defer` 请求一次扫描；`None` 表示禁用。
    pub(crate) auto_reclaim_threshold: Option<usize>,
    /// Passes between two sweeps of dead context slots; `0` never sweeps.
    /// 两次清理死上下文槽之间的扫描次数；`0` 表示从不清理。
    pub(crate) cleanup_interval: usize,
    /// 阻塞等待者两次扫描之间的休眠时间。
    pub(crate) barrier_pause: Duration,
    pub(crate) stall_warning: Duration,
    pub(crate) stall_timeout: Option<Duration>,
}

/// Global shared state for one SMR domain.
///
/// 一个 SMR 域的全局共享状态。
#[repr(align(64))]
pub(crate) struct SharedState {
    /// The global monotonic epoch counter, advanced only by the detector.
    /// 全局单调纪元计数器，只由检测器推进。
    pub(crate) global_epoch: AtomicUsize,
    /// Highest `min_active` published by a completed pass. Every reader whose
    /// captured epoch is below this value has left its critical section.
    /// 已完成扫描发布的最大 `min_active`。捕获纪元低于此值的读者都已离开临界区。
    pub(crate) grace_epoch: AtomicUsize,
    /// All registered context slots. Protected by a Mutex.
    /// 所有注册的上下文槽。由 Mutex 保护。
    pub(crate) contexts: Mutex<Vec<Arc<ContextSlot>>>,
    /// Deferred calls waiting for their grace period.
    /// 等待宽限期的延迟调用。
    pub(crate) queue: Mutex<DeferredQueue>,
    /// Number of calls ever deferred (the sequence number of the next one).
    /// 曾经入队的调用总数（即下一个调用的序号）。
    pub(crate) deferred: AtomicUsize,
    /// Number of deferred calls whose callback has run.
    /// 回调已运行的延迟调用数量。
    pub(crate) completed: AtomicUsize,
    /// Number of detector passes that advanced the epoch.
    /// 推进了纪元的检测扫描次数。
    pub(crate) passes: AtomicUsize,
    /// Set while a detector pass is running; passes never overlap.
    /// 检测扫描运行期间置位；扫描从不重叠。
    pub(crate) scanning: AtomicBool,
    /// Set by `defer` past the threshold when no reclaimer runs; cleared by
    /// the next pass.
    /// 没有回收线程时，`defer` 超过阈值会置位；下一次扫描清除。
    pub(crate) reclaim_requested: AtomicBool,
    /// Woken after every pass that made progress.
    /// 每次扫描结束后唤醒等待者。
    pub(crate) progress: Parker,
    /// Wakeup handle of the background reclaimer, if one was configured.
    /// 后台回收线程的唤醒句柄（如已配置）。
    pub(crate) reclaimer: Option<Arc<Wakeup>>,
    pub(crate) config: DomainConfig,
}

impl SharedState {
    pub(crate) fn new(config: DomainConfig, reclaimer: Option<Arc<Wakeup>>) -> Self {
        Self {
            global_epoch: AtomicUsize::new(0),
            grace_epoch: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            queue: Mutex::new(DeferredQueue::new()),
            deferred: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            passes: AtomicUsize::new(0),
            scanning: AtomicBool::new(false),
            reclaim_requested: AtomicBool::new(false),
            progress: Parker::new(),
            reclaimer,
            config,
        }
    }
}

impl Drop for SharedState {
    fn drop(&mut self) {
        if let Some(wakeup) = &self.reclaimer {
            wakeup.shutdown();
        }
    }
}
