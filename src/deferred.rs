use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

/// A bag of deferred calls that share one epoch tag, in registration order.
pub(crate) type Bag = VecDeque<DeferredEntry>;

/// A callback waiting for its grace period.
///
/// The payload is type-erased: `data` is a boxed closure and `call` is the
/// monomorphized function that unboxes and invokes it. The callback runs
/// exactly once, either when the detector releases the entry or, if the entry
/// is dropped first, from `Drop`.
///
/// 一个等待宽限期的回调。
/// 负载是类型擦除的：`data` 是装箱的闭包，`call` 是负责拆箱并调用它的单态化函数。
/// 回调恰好运行一次：要么在检测器释放条目时，要么在条目先被 drop 时由 `Drop` 运行。
pub(crate) struct DeferredEntry {
    data: *mut (),
    call: unsafe fn(*mut ()),
}

// The erased closure is required to be `Send` by `DeferredEntry::new`.
unsafe impl Send for DeferredEntry {}

/// Unboxes and invokes a closure erased by `DeferredEntry::new`.
/// 拆箱并调用由 `DeferredEntry::new` 擦除的闭包。
#[inline(always)]
unsafe fn call_boxed<F: FnOnce()>(data: *mut ()) {
    let callback = unsafe { Box::from_raw(data as *mut F) };
    callback();
}

impl DeferredEntry {
    #[inline]
    pub(crate) fn new<F: FnOnce() + Send + 'static>(callback: F) -> Self {
        DeferredEntry {
            data: Box::into_raw(Box::new(callback)) as *mut (),
            call: call_boxed::<F>,
        }
    }

    /// Run the callback, consuming the entry.
    #[inline]
    pub(crate) fn run(mut self) {
        let data = std::mem::replace(&mut self.data, std::ptr::null_mut());
        unsafe { (self.call)(data) }
    }
}

impl Drop for DeferredEntry {
    /// An entry that was never released still owes its callback. Dropping the
    /// queue only happens once no context can be reading.
    /// 从未被释放的条目仍欠一次回调。只有在没有上下文可能在读取时队列才会被 drop。
    #[inline]
    fn drop(&mut self) {
        if !self.data.is_null() {
            let data = std::mem::replace(&mut self.data, std::ptr::null_mut());
            unsafe { (self.call)(data) }
        }
    }
}

/// The pending queue: deferred calls in registration order, grouped in bags by
/// the epoch that was current when they were deferred.
///
/// Tags never decrease from front to back because the tag is read while the
/// queue lock is held and the global epoch only grows.
///
/// 待处理队列：按注册顺序排列的延迟调用，按延迟时的当前纪元分组成袋子。
/// 因为标签是在持有队列锁时读取的且全局纪元只增不减，所以标签从队首到队尾不会递减。
pub(crate) struct DeferredQueue {
    /// Queue of bags, ordered by epoch.
    /// Each element is (epoch, bag_of_entries).
    queue: VecDeque<(usize, Bag)>,
    /// Pool of empty vectors to reduce allocation.
    pool: Vec<Bag>,
    /// Total number of entries in the queue.
    count: usize,
}

impl DeferredQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pool: Vec::new(),
            count: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append an entry tagged with `epoch`.
    ///
    /// If the last bag carries the same tag the entry joins it, otherwise a new
    /// bag (possibly reused from the pool) is started.
    ///
    /// 追加一个带有 `epoch` 标签的条目。
    /// 如果最后一个袋子的标签相同则加入其中，否则开启一个新袋子（可能从池中复用）。
    pub(crate) fn push(&mut self, entry: DeferredEntry, epoch: usize) {
        debug_assert!(
            self.queue.back().is_none_or(|(last, _)| *last <= epoch),
            "BUG: deferred entries tagged out of order"
        );

        match self.queue.back_mut() {
            Some((last_epoch, bag)) if *last_epoch == epoch => bag.push_back(entry),
            _ => {
                let mut bag = self.pool.pop().unwrap_or_else(|| VecDeque::with_capacity(16));
                bag.push_back(entry);
                self.queue.push_back((epoch, bag));
            }
        }

        self.count += 1;
    }

    /// Detach every bag whose tag is strictly below `min_active`.
    ///
    /// The entries are returned instead of run so that callbacks execute after
    /// the queue lock is released.
    ///
    /// 取出所有标签严格小于 `min_active` 的袋子。
    /// 条目被返回而不是直接运行，以便回调在释放队列锁之后执行。
    pub(crate) fn take_expired(&mut self, min_active: usize) -> Vec<Bag> {
        let mut expired = Vec::new();
        while let Some((epoch, _)) = self.queue.front() {
            if *epoch >= min_active {
                break;
            }
            if let Some((_, bag)) = self.queue.pop_front() {
                self.count -= bag.len();
                expired.push(bag);
            }
        }
        expired
    }

    /// Take back bags returned by `take_expired`.
    ///
    /// Empty bags go to the pool. A bag that still holds entries (a callback
    /// panicked mid-pass) returns to the front of the queue; its entries have
    /// already expired, so the next pass releases them.
    ///
    /// 收回由 `take_expired` 取出的袋子。空袋子放回池中；
    /// 仍有条目的袋子（某个回调中途 panic）回到队首，下一次扫描会释放它们。
    pub(crate) fn restore(&mut self, bags: Vec<Bag>) {
        for bag in bags.into_iter().rev() {
            if bag.is_empty() {
                self.pool.push(bag);
            } else {
                self.count += bag.len();
                self.queue.push_front((0, bag));
            }
        }
    }
}
