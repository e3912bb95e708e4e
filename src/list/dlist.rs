use super::Retired;
use crate::context::ReadGuard;
use crate::domain::SmrDomain;
use crate::state::SharedState;
use crate::sync::{Arc, AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;
use std::ptr;

struct DNode<T> {
    value: T,
    next: AtomicPtr<DNode<T>>,
    prev: AtomicPtr<DNode<T>>,
}

unsafe fn take_dnode<T>(node: *mut ()) -> T {
    let node = unsafe { Box::from_raw(node as *mut DNode<T>) };
    node.value
}

struct ListInner<T> {
    head: AtomicPtr<DNode<T>>,
    tail: AtomicPtr<DNode<T>>,
    shared: Arc<SharedState>,
    _marker: PhantomData<T>,
}

impl<T> Drop for ListInner<T> {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next.load(Ordering::Relaxed);
        }
    }
}

/// Reader handle of an SMR-protected doubly-linked list.
///
/// Readers may walk forward from `first` or backward from `last`. A node a
/// writer has unlinked keeps both of its links, so a reader standing on it
/// can continue in either direction until it leaves the critical section.
///
/// SMR 保护的双向链表的读者句柄。
/// 读者可以从 `first` 向前遍历，也可以从 `last` 向后遍历。
/// 被写者摘除的节点保留两个方向的链接。
pub struct SmrList<T> {
    inner: Arc<ListInner<T>>,
}

impl<T> Clone for SmrList<T> {
    fn clone(&self) -> Self {
        SmrList {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> SmrList<T> {
    /// Create an empty list in `domain`, returning its unique writer handle and
    /// a reader handle.
    ///
    /// 在 `domain` 中创建一个空的双向链表，返回其唯一的写者句柄和一个读者句柄。
    pub fn new(domain: &SmrDomain) -> (ListWriter<T>, SmrList<T>) {
        let inner = Arc::new(ListInner {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            shared: Arc::clone(&domain.shared),
            _marker: PhantomData,
        });
        let writer = ListWriter {
            inner: Arc::clone(&inner),
        };
        (writer, SmrList { inner })
    }

    #[inline]
    fn check_guard(&self, guard: &ReadGuard<'_>) {
        assert!(
            guard.belongs_to(&self.inner.shared),
            "smr: read guard belongs to a different domain than the list"
        );
    }

    /// The first node.
    ///
    /// # Panics
    /// Panics if `guard` belongs to a different domain than the list.
    ///
    /// 第一个节点。如果 `guard` 属于其他域则 panic。
    #[inline]
    pub fn first<'g>(&'g self, guard: &'g ReadGuard<'_>) -> Option<ListNodeRef<'g, T>> {
        self.check_guard(guard);
        ListNodeRef::from_ptr(self.inner.head.load(Ordering::Acquire))
    }

    /// The last node.
    ///
    /// # Panics
    /// Panics if `guard` belongs to a different domain than the list.
    ///
    /// 最后一个节点。如果 `guard` 属于其他域则 panic。
    #[inline]
    pub fn last<'g>(&'g self, guard: &'g ReadGuard<'_>) -> Option<ListNodeRef<'g, T>> {
        self.check_guard(guard);
        ListNodeRef::from_ptr(self.inner.tail.load(Ordering::Acquire))
    }

    /// Iterate over the values front to back; `.rev()` walks back to front.
    /// 从前到后遍历值；`.rev()` 从后到前遍历。
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g ReadGuard<'_>) -> ListIter<'g, T> {
        ListIter {
            front: self.first(guard),
            back: self.last(guard),
            front_last: None,
            back_last: None,
        }
    }
}

/// A node observed by a reader, valid until the guard it borrows is dropped.
/// 读者观察到的节点，在其借用的守卫被 drop 之前一直有效。
pub struct ListNodeRef<'g, T> {
    node: &'g DNode<T>,
}

impl<'g, T> Clone for ListNodeRef<'g, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'g, T> Copy for ListNodeRef<'g, T> {}

impl<'g, T> ListNodeRef<'g, T> {
    #[inline]
    fn from_ptr(ptr: *mut DNode<T>) -> Option<Self> {
        // SAFETY: see `SListNodeRef::from_ptr`.
        unsafe { ptr.as_ref() }.map(|node| ListNodeRef { node })
    }

    /// The successor of this node; an unlinked node still leads to its old
    /// successor.
    /// 此节点的后继；已摘除的节点仍指向其原来的后继。
    #[inline]
    pub fn next(&self) -> Option<ListNodeRef<'g, T>> {
        Self::from_ptr(self.node.next.load(Ordering::Acquire))
    }

    /// The predecessor of this node.
    /// 此节点的前驱。
    #[inline]
    pub fn prev(&self) -> Option<ListNodeRef<'g, T>> {
        Self::from_ptr(self.node.prev.load(Ordering::Acquire))
    }

    /// The value, borrowed for the lifetime of the guard.
    /// 节点的值，借用期与守卫相同。
    #[inline]
    pub fn value(&self) -> &'g T {
        &self.node.value
    }

    #[inline]
    fn same(&self, other: &Self) -> bool {
        ptr::eq(self.node, other.node)
    }
}

impl<'g, T> std::ops::Deref for ListNodeRef<'g, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.node.value
    }
}

/// Lock-free double-ended iterator over an `SmrList` inside a critical
/// section.
///
/// The two ends are snapshots taken at creation. Walking in one direction
/// never yields a node twice and stops at the first null link. When `next` and
/// `next_back` are mixed, iteration ends once the ends meet, or once one end
/// reaches the node the other end yielded last. A writer that unlinks several
/// nodes between the two ends while they move can still make a mixed walk
/// repeat a node; walk in a single direction when that matters.
///
/// 在临界区内无锁遍历 `SmrList` 的双端迭代器。两端是创建时的快照。
/// 单方向遍历从不重复产出节点，并在第一个空链接处停止。混合使用 `next` 和
/// `next_back` 时，两端相遇、或一端到达另一端最后产出的节点时遍历结束。
/// 写者在两端移动期间于两端之间摘除多个节点时，混合遍历仍可能重复某个节点；
/// 需要时请只朝一个方向遍历。
pub struct ListIter<'g, T> {
    front: Option<ListNodeRef<'g, T>>,
    back: Option<ListNodeRef<'g, T>>,
    front_last: Option<ListNodeRef<'g, T>>,
    back_last: Option<ListNodeRef<'g, T>>,
}

impl<'g, T> ListIter<'g, T> {
    #[inline]
    fn finish(&mut self) {
        self.front = None;
        self.back = None;
    }
}

impl<'g, T> Iterator for ListIter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        let node = self.front.take()?;
        // Crossed: the back end already yielded this node.
        if self.back_last.is_some_and(|last| last.same(&node)) {
            self.finish();
            return None;
        }
        match &self.back {
            Some(back) if back.same(&node) => self.back = None,
            _ => self.front = node.next(),
        }
        self.front_last = Some(node);
        Some(node.value())
    }
}

impl<'g, T> DoubleEndedIterator for ListIter<'g, T> {
    fn next_back(&mut self) -> Option<&'g T> {
        let node = self.back.take()?;
        if self.front_last.is_some_and(|last| last.same(&node)) {
            self.finish();
            return None;
        }
        match &self.front {
            Some(front) if front.same(&node) => self.front = None,
            _ => self.back = node.prev(),
        }
        self.back_last = Some(node);
        Some(node.value())
    }
}

/// The unique writer handle of an `SmrList`.
///
/// All methods take `&mut self`: put the handle behind the lock that
/// serializes your writers.
///
/// SMR 双向链表的唯一写者句柄。
pub struct ListWriter<T> {
    inner: Arc<ListInner<T>>,
}

impl<T: Send + Sync + 'static> ListWriter<T> {
    #[inline]
    fn alloc(value: T, prev: *mut DNode<T>, next: *mut DNode<T>) -> *mut DNode<T> {
        Box::into_raw(Box::new(DNode {
            value,
            next: AtomicPtr::new(next),
            prev: AtomicPtr::new(prev),
        }))
    }

    fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<*mut DNode<T>> {
        let mut cur = self.inner.head.load(Ordering::Relaxed);
        while let Some(node) = unsafe { cur.as_ref() } {
            if pred(&node.value) {
                return Some(cur);
            }
            cur = node.next.load(Ordering::Relaxed);
        }
        None
    }

    /// Link a fully initialized `node` between `prev` and `next`.
    ///
    /// Forward link first: a reader walking forward sees the node only after
    /// it is complete, and a reader walking backward from `next` sees either
    /// `prev` or the new node.
    fn link(&mut self, node: *mut DNode<T>, prev: *mut DNode<T>, next: *mut DNode<T>) {
        match unsafe { prev.as_ref() } {
            Some(prev) => prev.next.store(node, Ordering::Release),
            None => self.inner.head.store(node, Ordering::Release),
        }
        match unsafe { next.as_ref() } {
            Some(next) => next.prev.store(node, Ordering::Release),
            None => self.inner.tail.store(node, Ordering::Release),
        }
    }

    /// Insert `value` at the front of the list.
    /// 在链表头部插入 `value`。
    pub fn insert_head_locked(&mut self, value: T) {
        let next = self.inner.head.load(Ordering::Relaxed);
        let node = Self::alloc(value, ptr::null_mut(), next);
        self.link(node, ptr::null_mut(), next);
    }

    /// Insert `value` at the back of the list.
    /// 在链表尾部插入 `value`。
    pub fn insert_tail_locked(&mut self, value: T) {
        let prev = self.inner.tail.load(Ordering::Relaxed);
        let node = Self::alloc(value, prev, ptr::null_mut());
        self.link(node, prev, ptr::null_mut());
    }

    /// Insert `value` right after the first node matching `pred`.
    /// Gives the value back when no node matches.
    /// 在第一个匹配 `pred` 的节点之后插入 `value`，没有匹配时交还该值。
    pub fn insert_after_locked(
        &mut self,
        pred: impl FnMut(&T) -> bool,
        value: T,
    ) -> Result<(), T> {
        let Some(prev) = self.find(pred) else {
            return Err(value);
        };
        let next = unsafe { (*prev).next.load(Ordering::Relaxed) };
        let node = Self::alloc(value, prev, next);
        self.link(node, prev, next);
        Ok(())
    }

    /// Insert `value` right before the first node matching `pred`.
    /// Gives the value back when no node matches.
    /// 在第一个匹配 `pred` 的节点之前插入 `value`，没有匹配时交还该值。
    pub fn insert_before_locked(
        &mut self,
        pred: impl FnMut(&T) -> bool,
        value: T,
    ) -> Result<(), T> {
        let Some(next) = self.find(pred) else {
            return Err(value);
        };
        let prev = unsafe { (*next).prev.load(Ordering::Relaxed) };
        let node = Self::alloc(value, prev, next);
        self.link(node, prev, next);
        Ok(())
    }

    /// Unlink the first node matching `pred`.
    ///
    /// Both neighbors are redirected past the node; the node's own `next` and
    /// `prev` stay intact for readers still standing on it.
    ///
    /// 摘除第一个匹配 `pred` 的节点。两侧邻居都被重定向越过该节点；
    /// 节点自己的 `next` 和 `prev` 保持不变。
    pub fn remove_locked(&mut self, pred: impl FnMut(&T) -> bool) -> Option<Retired<T>> {
        let cur = self.find(pred)?;
        Some(self.unlink(cur))
    }

    /// Unlink the first node.
    /// 摘除第一个节点。
    pub fn remove_head_locked(&mut self) -> Option<Retired<T>> {
        let head = self.inner.head.load(Ordering::Relaxed);
        (!head.is_null()).then(|| self.unlink(head))
    }

    /// Unlink the last node.
    /// 摘除最后一个节点。
    pub fn remove_tail_locked(&mut self) -> Option<Retired<T>> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        (!tail.is_null()).then(|| self.unlink(tail))
    }

    fn unlink(&mut self, cur: *mut DNode<T>) -> Retired<T> {
        let (prev, next) = unsafe {
            (
                (*cur).prev.load(Ordering::Relaxed),
                (*cur).next.load(Ordering::Relaxed),
            )
        };
        match unsafe { prev.as_ref() } {
            Some(prev) => prev.next.store(next, Ordering::Release),
            None => self.inner.head.store(next, Ordering::Release),
        }
        match unsafe { next.as_ref() } {
            Some(next) => next.prev.store(prev, Ordering::Release),
            None => self.inner.tail.store(prev, Ordering::Release),
        }
        Retired::new(
            cur as *mut (),
            take_dnode::<T>,
            Arc::clone(&self.inner.shared),
        )
    }

    /// Unlink every node for which `keep` returns false; their values are
    /// dropped after a grace period. Returns the number of nodes removed.
    ///
    /// 摘除所有 `keep` 返回 false 的节点，返回摘除的节点数量。
    pub fn retain_locked(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut removed = 0;
        let mut cur = self.inner.head.load(Ordering::Relaxed);
        while let Some(node) = unsafe { cur.as_ref() } {
            let next = node.next.load(Ordering::Relaxed);
            if !keep(&node.value) {
                self.unlink(cur).retire();
                removed += 1;
            }
            cur = next;
        }
        removed
    }

    /// The first value, read under the writer lock.
    /// 在写者锁下读取第一个值。
    #[inline]
    pub fn first_locked(&self) -> Option<&T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        unsafe { head.as_ref() }.map(|node| &node.value)
    }

    /// 在写者锁下读取最后一个值。
    #[inline]
    pub fn last_locked(&self) -> Option<&T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        unsafe { tail.as_ref() }.map(|node| &node.value)
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

    /// Iterate over the values front to back without a critical section.
    /// 不进入临界区，从前到后遍历值。
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
    pub fn reader(&self) -> SmrList<T> {
        SmrList {
            inner: Arc::clone(&self.inner),
        }
    }
}
