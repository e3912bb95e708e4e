use super::Retired;
use crate::context::ReadGuard;
use crate::domain::SmrDomain;
use crate::state::SharedState;
use crate::sync::{Arc, AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;
use std::ptr;

struct SNode<T> {
    value: T,
    next: AtomicPtr<SNode<T>>,
}

/// Reconstructs an unlinked node and returns its value.
unsafe fn take_snode<T>(node: *mut ()) -> T {
    let node = unsafe { Box::from_raw(node as *mut SNode<T>) };
    node.value
}

struct SListInner<T> {
    head: AtomicPtr<SNode<T>>,
    shared: Arc<SharedState>,
    // Readers hand out `&T` across threads; removed values move to callbacks.
    _marker: PhantomData<T>,
}

impl<T> Drop for SListInner<T> {
    /// The last handle is gone, so no guard-bound reference can exist: free the
    /// nodes that are still linked. Removed nodes belong to the queue.
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(Ordering::Relaxed);
        }
    }
}

/// Reader handle of an SMR-protected singly-linked list.
///
/// `SmrSList<T>` is `Clone` and can be shared with every reader thread. All
/// read operations require a `ReadGuard` from the list's domain and return
/// references bound to that guard.
///
/// **Typical Usage**:
/// ```
/// use smr_epoch::{SmrDomain, SmrSList};
///
/// let domain = SmrDomain::new();
/// let (mut writer, list) = SmrSList::new(&domain);
/// writer.insert_tail_locked(1);
/// writer.insert_tail_locked(2);
///
/// let context = domain.register_context();
/// let guard = context.enter_read();
/// let values: Vec<i32> = list.iter(&guard).copied().collect();
/// assert_eq!(values, vec![1, 2]);
/// ```
///
/// SMR 保护的单链表的读者句柄。
/// 所有读操作都需要来自该链表所属域的 `ReadGuard`，返回的引用绑定到该守卫。
pub struct SmrSList<T> {
    inner: Arc<SListInner<T>>,
}

impl<T> Clone for SmrSList<T> {
    fn clone(&self) -> Self {
        SmrSList {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> SmrSList<T> {
    /// Create an empty list in `domain`, returning its unique writer handle and
    /// a reader handle.
    ///
    /// 在 `domain` 中创建一个空链表，返回其唯一的写者句柄和一个读者句柄。
    pub fn new(domain: &SmrDomain) -> (SListWriter<T>, SmrSList<T>) {
        let inner = Arc::new(SListInner {
            head: AtomicPtr::new(ptr::null_mut()),
            shared: Arc::clone(&domain.shared),
            _marker: PhantomData,
        });
        let writer = SListWriter {
            inner: Arc::clone(&inner),
        };
        (writer, SmrSList { inner })
    }

    /// The first node, as seen inside the critical section held by `guard`.
    ///
    /// # Panics
    /// Panics if `guard` belongs to a different domain than the list.
    ///
    /// 在 `guard` 持有的临界区内看到的第一个节点。如果 `guard` 属于其他域则 panic。
    #[inline]
    pub fn first<'g>(&'g self, guard: &'g ReadGuard<'_>) -> Option<SListNodeRef<'g, T>> {
        assert!(
            guard.belongs_to(&self.inner.shared),
            "smr: read guard belongs to a different domain than the list"
        );
        SListNodeRef::from_ptr(self.inner.head.load(Ordering::Acquire))
    }

    /// Iterate over the values, front to back.
    /// 从前到后遍历值。
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g ReadGuard<'_>) -> SListIter<'g, T> {
        SListIter {
            next: self.first(guard),
        }
    }
}

/// A node observed by a reader. Valid until the guard it borrows is dropped,
/// even if a writer unlinks the node in the meantime.
///
/// 读者观察到的节点。在其借用的守卫被 drop 之前一直有效，即使写者在此期间摘除了该节点。
pub struct SListNodeRef<'g, T> {
    node: &'g SNode<T>,
}

impl<'g, T> Clone for SListNodeRef<'g, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'g, T> Copy for SListNodeRef<'g, T> {}

impl<'g, T> SListNodeRef<'g, T> {
    #[inline]
    fn from_ptr(ptr: *mut SNode<T>) -> Option<Self> {
        // SAFETY: a non-null link points at a node that was fully initialized
        // before publication, and it is not reclaimed while the guard lives.
        unsafe { ptr.as_ref() }.map(|node| SListNodeRef { node })
    }

    /// The successor of this node. A node that has been unlinked still leads
    /// to its old successor.
    ///
    /// 此节点的后继。已被摘除的节点仍然指向它原来的后继。
    #[inline]
    pub fn next(&self) -> Option<SListNodeRef<'g, T>> {
        Self::from_ptr(self.node.next.load(Ordering::Acquire))
    }

    /// The value stored in the node.
    /// 节点中存储的值。
    #[inline]
    pub fn value(&self) -> &'g T {
        &self.node.value
    }
}

impl<'g, T> std::ops::Deref for SListNodeRef<'g, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.node.value
    }
}

/// Lock-free iterator over an `SmrSList` inside a critical section.
pub struct SListIter<'g, T> {
    next: Option<SListNodeRef<'g, T>>,
}

impl<'g, T> Iterator for SListIter<'g, T> {
    type Item = &'g T;

    #[inline]
    fn next(&mut self) -> Option<&'g T> {
        let node = self.next.take()?;
        self.next = node.next();
        Some(node.value())
    }
}

/// The unique writer handle of an `SmrSList`.
///
/// All methods take `&mut self`: put the handle behind the lock that
/// serializes your writers. Readers are never blocked by it.
///
/// SMR 单链表的唯一写者句柄。
/// 所有方法都接收 `&mut self`：把句柄放在用于串行化写者的锁后面。读者永远不会被它阻塞。
pub struct SListWriter<T> {
    inner: Arc<SListInner<T>>,
}

impl<T: Send + Sync + 'static> SListWriter<T> {
    #[inline]
    fn alloc(value: T, next: *mut SNode<T>) -> *mut SNode<T> {
        Box::into_raw(Box::new(SNode {
            value,
            next: AtomicPtr::new(next),
        }))
    }

    /// The link that points at the last node (or the head link when empty).
    fn tail_link(&self) -> &AtomicPtr<SNode<T>> {
        let mut link = &self.inner.head;
        loop {
            let cur = link.load(Ordering::Relaxed);
            if cur.is_null() {
                return link;
            }
            link = unsafe { &(*cur).next };
        }
    }

    /// The link whose target is the first node matching `pred`.
    fn find_link(&self, mut pred: impl FnMut(&T) -> bool) -> Option<&AtomicPtr<SNode<T>>> {
        let mut link = &self.inner.head;
        loop {
            let cur = link.load(Ordering::Relaxed);
            if cur.is_null() {
                return None;
            }
            let node = unsafe { &*cur };
            if pred(&node.value) {
                return Some(link);
            }
            link = &node.next;
        }
    }

    /// Insert `value` at the front of the list.
    /// 在链表头部插入 `value`。
    pub fn insert_head_locked(&mut self, value: T) {
        let head = self.inner.head.load(Ordering::Relaxed);
        let node = Self::alloc(value, head);
        self.inner.head.store(node, Ordering::Release);
    }

    /// Insert `value` at the back of the list. Walks the list.
    /// 在链表尾部插入 `value`。需要遍历整个链表。
    pub fn insert_tail_locked(&mut self, value: T) {
        let node = Self::alloc(value, ptr::null_mut());
        self.tail_link().store(node, Ordering::Release);
    }

    /// Insert `value` right after the first node matching `pred`.
    ///
    /// Gives the value back when no node matches.
    ///
    /// 在第一个匹配 `pred` 的节点之后插入 `value`。没有匹配的节点时交还该值。
    pub fn insert_after_locked(
        &mut self,
        pred: impl FnMut(&T) -> bool,
        value: T,
    ) -> Result<(), T> {
        let Some(link) = self.find_link(pred) else {
            return Err(value);
        };
        let at = unsafe { &*link.load(Ordering::Relaxed) };
        let node = Self::alloc(value, at.next.load(Ordering::Relaxed));
        at.next.store(node, Ordering::Release);
        Ok(())
    }

    /// Unlink the first node matching `pred`.
    ///
    /// The predecessor is redirected past the node; the node's own `next` is
    /// left intact for readers still standing on it. The returned `Retired`
    /// must be handed to the domain (dropping it does so implicitly).
    ///
    /// 摘除第一个匹配 `pred` 的节点。
    /// 前驱被重定向越过该节点；节点自己的 `next` 保持不变，供仍停在其上的读者使用。
    pub fn remove_locked(&mut self, pred: impl FnMut(&T) -> bool) -> Option<Retired<T>> {
        let link = self.find_link(pred)?;
        let cur = link.load(Ordering::Relaxed);
        let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
        link.store(next, Ordering::Release);
        Some(Retired::new(
            cur as *mut (),
            take_snode::<T>,
            Arc::clone(&self.inner.shared),
        ))
    }

    /// Unlink the first node. See `remove_locked`.
    /// 摘除第一个节点。参见 `remove_locked`。
    pub fn remove_head_locked(&mut self) -> Option<Retired<T>> {
        self.remove_locked(|_| true)
    }

    /// Unlink every node for which `keep` returns false; their values are
    /// dropped after a grace period. Returns the number of nodes removed.
    ///
    /// 摘除所有 `keep` 返回 false 的节点；它们的值在宽限期之后 drop。返回摘除的节点数量。
    pub fn retain_locked(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut removed = 0;
        while let Some(retired) = self.remove_locked(|value| !keep(value)) {
            retired.retire();
            removed += 1;
        }
        removed
    }

    /// The first value, from the writer's point of view.
    /// 写者视角下的第一个值。
    #[inline]
    pub fn first_locked(&self) -> Option<&T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        unsafe { head.as_ref() }.map(|node| &node.value)
    }

    #[inline]
    pub fn is_empty_locked(&self) -> bool {
        self.inner.head.load(Ordering::Relaxed).is_null()
    }

    /// Number of linked nodes. Walks the list.
    /// 已链接节点的数量。需要遍历整个链表。
    pub fn len_locked(&self) -> usize {
        self.iter_locked().count()
    }

    /// Iterate over the values without a critical section. Only the writer may
    /// do this, since nothing it can reach is reclaimed while it holds `&self`.
    ///
    /// 不进入临界区遍历值。只有写者可以这样做：持有 `&self` 期间，它能到达的节点都不会被回收。
    pub fn iter_locked(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cur = self.inner.head.load(Ordering::Relaxed);
        std::iter::from_fn(move || {
            let node = unsafe { cur.as_ref() }?;
            cur = node.next.load(Ordering::Relaxed);
            Some(&node.value)
        })
    }

    /// A reader handle for this list.
    /// 此链表的读者句柄。
    #[inline]
    pub fn reader(&self) -> SmrSList<T> {
        SmrSList {
            inner: Arc::clone(&self.inner),
        }
    }
}
