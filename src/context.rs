use crate::state::{ContextSlot, SharedState, INACTIVE_EPOCH};
use crate::sync::{fence, Arc, Cell, Ordering};

/// An execution context's handle on an SMR domain.
///
/// Each thread (or other execution context) that reads SMR-protected data
/// obtains exactly one `SmrContext` via `SmrDomain::register_context()`.
/// It is `!Sync` (due to `Cell`) and must be used by one thread at a time.
///
/// The `SmrContext` is used to:
/// - Enter a read-side critical section via `enter_read()`.
/// - Report quiescence via `idle()`.
/// - Check critical-section contracts in debug builds.
///
/// Dropping the context removes it from grace-period scans.
///
/// 执行上下文在 SMR 域上的句柄。
/// 每个读取 SMR 保护数据的线程（或其他执行上下文）通过
/// `SmrDomain::register_context()` 获取恰好一个 `SmrContext`。
/// 它是 `!Sync` 的（因为 `Cell`），同一时刻只能由一个线程使用。
/// drop 上下文会将其从宽限期扫描中移除。
pub struct SmrContext {
    slot: Arc<ContextSlot>,
    shared: Arc<SharedState>,
    depth: Cell<usize>,
}

impl SmrContext {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        let slot = Arc::new(ContextSlot::new());

        // Register the context immediately in the shared registry
        shared.contexts.lock().push(Arc::clone(&slot));

        SmrContext {
            slot,
            shared,
            depth: Cell::new(0),
        }
    }

    /// Enter a read-side critical section.
    ///
    /// Captures the current global epoch into this context's slot, making the
    /// context visible to the detector as active. Never blocks, never
    /// allocates. The section ends when the returned `ReadGuard` is dropped.
    ///
    /// Nested calls are allowed; the context stays active with the epoch
    /// captured by the outermost call until every guard is dropped.
    ///
    /// 进入读侧临界区。
    /// 将当前全局纪元捕获到此上下文的槽中，使检测器将该上下文视为活跃。
    /// 从不阻塞，从不分配。返回的 `ReadGuard` 被 drop 时临界区结束。
    /// 允许嵌套调用；上下文会保持最外层调用捕获的纪元直到所有守卫被 drop。
    #[inline]
    pub fn enter_read(&self) -> ReadGuard<'_> {
        let depth = self.depth.get();

        if depth == 0 {
            let epoch = self.shared.global_epoch.load(Ordering::SeqCst);
            self.slot.active_epoch.store(epoch, Ordering::SeqCst);
            // Orders the slot store before every protected load that follows.
            fence(Ordering::SeqCst);
        }

        self.depth.set(depth + 1);

        ReadGuard {
            context: self,
            shared: &self.shared,
        }
    }

    /// Whether this context is currently inside a read-side critical section.
    /// 此上下文当前是否处于读侧临界区内。
    #[inline]
    pub fn in_critical(&self) -> bool {
        self.depth.get() > 0
    }

    /// Debug-build check that this context is inside a critical section.
    /// 调试构建下检查此上下文处于临界区内。
    #[inline]
    pub fn assert_in_critical(&self) {
        debug_assert!(
            self.in_critical(),
            "smr: expected to be inside a read-side critical section"
        );
    }

    /// Debug-build check that this context is quiescent.
    /// 调试构建下检查此上下文处于静止状态。
    #[inline]
    pub fn assert_not_in_critical(&self) {
        debug_assert!(
            !self.in_critical(),
            "smr: expected to be outside any read-side critical section"
        );
    }

    /// Report that this context is quiescent and has nothing better to do.
    ///
    /// Lets pending deferred calls make progress: wakes the background
    /// reclaimer if the domain has one, otherwise tries a non-blocking
    /// detector pass on this thread. Calling it is never required for
    /// correctness.
    ///
    /// 报告此上下文处于静止状态且没有其他工作。
    /// 让待处理的延迟调用取得进展：如果域有后台回收线程则唤醒它，
    /// 否则在当前线程上尝试一次非阻塞的检测扫描。调用它从来不是正确性所必需的。
    pub fn idle(&self) {
        self.assert_not_in_critical();
        self.shared.idle();
    }
}

impl Drop for SmrContext {
    fn drop(&mut self) {
        self.slot
            .active_epoch
            .store(INACTIVE_EPOCH, Ordering::Release);
    }
}

/// A guard marking a read-side critical section.
///
/// `ReadGuard` is obtained by calling `SmrContext::enter_read()`.
/// It is `!Send` and `!Sync` because it references a `!Sync` `SmrContext`.
/// References obtained from SMR containers borrow the guard, so they cannot
/// be used after the section ends.
///
/// `ReadGuard` supports cloning (increments the nesting depth); the context
/// stays active until all clones are dropped.
///
/// 标记读侧临界区的守卫。
/// 它是 `!Send` 和 `!Sync` 的，因为它引用了一个 `!Sync` 的 `SmrContext`。
/// 从 SMR 容器获得的引用借用此守卫，因此临界区结束后无法再使用它们。
#[must_use]
pub struct ReadGuard<'a> {
    context: &'a SmrContext,
    shared: &'a Arc<SharedState>,
}

impl<'a> ReadGuard<'a> {
    /// Leave the critical section. Equivalent to dropping the guard.
    /// 离开临界区。等价于 drop 守卫。
    #[inline]
    pub fn leave(self) {}

    /// The context this guard belongs to.
    /// 此守卫所属的上下文。
    #[inline]
    pub fn context(&self) -> &'a SmrContext {
        self.context
    }

    /// Whether this guard was issued by the domain that owns `shared`.
    #[inline]
    pub(crate) fn belongs_to(&self, shared: &Arc<SharedState>) -> bool {
        Arc::ptr_eq(self.shared, shared)
    }
}

impl<'a> Clone for ReadGuard<'a> {
    #[inline]
    fn clone(&self) -> Self {
        let depth = self.context.depth.get();

        assert!(
            depth > 0,
            "BUG: Cloning a ReadGuard outside a critical section (depth = 0). \
             This indicates incorrect API usage or a library bug."
        );

        self.context.depth.set(depth + 1);

        ReadGuard {
            context: self.context,
            shared: self.shared,
        }
    }
}

impl<'a> Drop for ReadGuard<'a> {
    #[inline]
    fn drop(&mut self) {
        let depth = self.context.depth.get();

        assert!(
            depth > 0,
            "BUG: Dropping a ReadGuard outside a critical section (depth = 0). \
             This indicates incorrect API usage or a library bug."
        );

        if depth == 1 {
            self.context
                .slot
                .active_epoch
                .store(INACTIVE_EPOCH, Ordering::Release);
        }

        self.context.depth.set(depth - 1);
    }
}
