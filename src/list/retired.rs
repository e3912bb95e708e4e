use crate::deferred::DeferredEntry;
use crate::state::SharedState;
use crate::sync::Arc;
use std::marker::PhantomData;

/// A node pointer that may cross threads once its grace period has passed.
struct RetiredPtr(*mut ());

// Only constructed for nodes whose value is `Send`; see `Retired::new`.
unsafe impl Send for RetiredPtr {}

/// A node that has been unlinked from an SMR list but not yet reclaimed.
///
/// Readers that were inside a critical section when the node was unlinked may
/// still be looking at it, so the value can only be taken back after a grace
/// period. Hand it to the queue with [`Retired::defer`] to receive the value in
/// a callback, or with [`Retired::retire`] (or by dropping it) to just drop the
/// value once it is safe.
///
/// 一个已从 SMR 链表中摘除但尚未回收的节点。
/// 摘除时处于临界区内的读者可能仍在查看它，因此只有在宽限期之后才能取回值。
/// 使用 [`Retired::defer`] 将其交给队列以在回调中接收值，
/// 或使用 [`Retired::retire`]（或直接 drop）在安全时 drop 该值。
#[must_use = "a retired node is reclaimed only after a grace period; call `defer` or `retire`"]
pub struct Retired<T: Send + 'static> {
    node: *mut (),
    take: unsafe fn(*mut ()) -> T,
    shared: Arc<SharedState>,
    _marker: PhantomData<T>,
}

// The node is no longer reachable from the list; only the value travels.
unsafe impl<T: Send + 'static> Send for Retired<T> {}

impl<T: Send + 'static> Retired<T> {
    /// `take` must reconstruct the node allocated behind `node` and return its
    /// value; it is called at most once.
    pub(crate) fn new(node: *mut (), take: unsafe fn(*mut ()) -> T, shared: Arc<SharedState>) -> Self {
        Retired {
            node,
            take,
            shared,
            _marker: PhantomData,
        }
    }

    /// Defer `callback(value)` until every reader that could still observe the
    /// node has left its critical section.
    ///
    /// 延迟 `callback(value)`，直到所有仍可能观察到该节点的读者都已离开临界区。
    pub fn defer<F>(mut self, callback: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let node = RetiredPtr(std::mem::replace(&mut self.node, std::ptr::null_mut()));
        let take = self.take;
        self.shared.defer_entry(DeferredEntry::new(move || {
            let node = node;
            // SAFETY: the grace period has elapsed, so no reader holds the node.
            let value = unsafe { take(node.0) };
            callback(value);
        }));
    }

    /// Drop the value once every reader that could observe the node has left.
    /// 在所有可能观察到该节点的读者都离开后 drop 该值。
    #[inline]
    pub fn retire(self) {
        self.defer(drop);
    }
}

impl<T: Send + 'static> Drop for Retired<T> {
    fn drop(&mut self) {
        if self.node.is_null() {
            return;
        }
        let node = RetiredPtr(std::mem::replace(&mut self.node, std::ptr::null_mut()));
        let take = self.take;
        self.shared.defer_entry(DeferredEntry::new(move || {
            let node = node;
            drop(unsafe { take(node.0) });
        }));
    }
}

impl<T: Send + 'static> std::fmt::Debug for Retired<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Retired").field(&self.node).finish()
    }
}
