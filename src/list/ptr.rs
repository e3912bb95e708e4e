use super::Retired;
use crate::context::ReadGuard;
use crate::domain::SmrDomain;
use crate::state::SharedState;
use crate::sync::{Arc, AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;
use std::ptr;

/// Reconstructs a value that was replaced in an `SmrPtr`.
unsafe fn take_boxed<T>(value: *mut ()) -> T {
    *unsafe { Box::from_raw(value as *mut T) }
}

struct PtrInner<T> {
    ptr: AtomicPtr<T>,
    shared: Arc<SharedState>,
    _marker: PhantomData<T>,
}

impl<T> Drop for PtrInner<T> {
    /// No handle is left, so nobody can hold a reference to the current value.
    /// Values replaced earlier belong to the queue.
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Relaxed);
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

/// Reader handle of an SMR-protected pointer cell.
///
/// `SmrPtr<T>` holds at most one heap value. Readers load it with Acquire
/// inside a read-side critical section and get a reference bound to their
/// guard. The unique [`SmrPtrWriter`] replaces the value with a Release swap
/// and receives the previous one as a [`Retired`], which is reclaimed only after
/// every reader that could still see it has left.
///
/// **Typical Usage**:
/// ```
/// use smr_epoch::{SmrDomain, SmrPtr};
///
/// let domain = SmrDomain::new();
/// let (mut writer, config) = SmrPtr::new(&domain, Some(Box::new(1u32)));
///
/// let context = domain.register_context();
/// {
///     let guard = context.enter_read();
///     assert_eq!(config.get(&guard), Some(&1));
/// }
///
/// if let Some(old) = writer.set_locked(Box::new(2)) {
///     old.retire();
/// }
/// assert_eq!(writer.get_locked(), Some(&2));
/// domain.barrier();
/// ```
///
/// SMR 保护的指针单元的读者句柄。
/// `SmrPtr<T>` 最多持有一个堆上的值。读者在读侧临界区内以 Acquire 加载它，
/// 得到绑定到守卫的引用。唯一的 [`SmrPtrWriter`] 以 Release 交换替换该值，
/// 并以 [`Retired`] 的形式收到旧值，旧值只在所有可能仍看到它的读者离开后才被回收。
pub struct SmrPtr<T> {
    inner: Arc<PtrInner<T>>,
}

impl<T> Clone for SmrPtr<T> {
    fn clone(&self) -> Self {
        SmrPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> SmrPtr<T> {
    /// Create a cell in `domain` holding `initial`, returning its unique writer
    /// handle and a reader handle.
    ///
    /// 在 `domain` 中创建一个持有 `initial` 的指针单元，返回其唯一的写者句柄和一个读者句柄。
    pub fn new(domain: &SmrDomain, initial: Option<Box<T>>) -> (SmrPtrWriter<T>, SmrPtr<T>) {
        let raw = initial.map_or(ptr::null_mut(), Box::into_raw);
        let inner = Arc::new(PtrInner {
            ptr: AtomicPtr::new(raw),
            shared: Arc::clone(&domain.shared),
            _marker: PhantomData,
        });
        let writer = SmrPtrWriter {
            inner: Arc::clone(&inner),
        };
        (writer, SmrPtr { inner })
    }

    /// Load the current value inside the critical section held by `guard`.
    ///
    /// The returned reference stays valid until the guard is dropped, even if
    /// the writer replaces the value in the meantime.
    ///
    /// # Panics
    /// Panics if `guard` belongs to a different domain than the cell.
    ///
    /// 在 `guard` 持有的临界区内加载当前值。
    /// 返回的引用在守卫被 drop 之前一直有效，即使写者在此期间替换了该值。
    #[inline]
    pub fn get<'g>(&'g self, guard: &'g ReadGuard<'_>) -> Option<&'g T> {
        assert!(
            guard.belongs_to(&self.inner.shared),
            "smr: read guard belongs to a different domain than the pointer"
        );
        let ptr = self.inner.ptr.load(Ordering::Acquire);
        // SAFETY: the value was fully initialized before its Release publication
        // and is not reclaimed while the guard lives.
        unsafe { ptr.as_ref() }
    }
}

impl<T> std::fmt::Debug for SmrPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.inner.ptr.load(Ordering::Relaxed);
        f.debug_tuple("SmrPtr").field(&ptr).finish()
    }
}

/// Unique writer handle of an [`SmrPtr`].
///
/// Methods take `&mut self`: put the handle behind the writer lock of your
/// choice. Replaced values come back as [`Retired`].
///
/// [`SmrPtr`] 的唯一写者句柄。方法接收 `&mut self`，请把句柄放在你选择的写者锁之后。
pub struct SmrPtrWriter<T> {
    inner: Arc<PtrInner<T>>,
}

impl<T: Send + Sync + 'static> SmrPtrWriter<T> {
    /// The current value, read under the writer lock.
    /// 在写者锁下读取当前值。
    #[inline]
    pub fn get_locked(&self) -> Option<&T> {
        // SAFETY: only this handle replaces the value, and it cannot do so
        // while the returned reference borrows it.
        unsafe { self.inner.ptr.load(Ordering::Relaxed).as_ref() }
    }

    /// Publish `value` and return the value it replaced.
    ///
    /// 发布 `value` 并返回被替换的旧值。
    #[inline]
    pub fn set_locked(&mut self, value: Box<T>) -> Option<Retired<T>> {
        self.swap(Box::into_raw(value))
    }

    /// Empty the cell and return the value it held.
    /// 清空单元并返回其持有的值。
    #[inline]
    pub fn take_locked(&mut self) -> Option<Retired<T>> {
        self.swap(ptr::null_mut())
    }

    /// A new reader handle for the same cell.
    #[inline]
    pub fn reader(&self) -> SmrPtr<T> {
        SmrPtr {
            inner: Arc::clone(&self.inner),
        }
    }

    fn swap(&mut self, new: *mut T) -> Option<Retired<T>> {
        let old = self.inner.ptr.swap(new, Ordering::Release);
        if old.is_null() {
            return None;
        }
        Some(Retired::new(
            old as *mut (),
            take_boxed::<T>,
            Arc::clone(&self.inner.shared),
        ))
    }
}

impl<T> std::fmt::Debug for SmrPtrWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.inner.ptr.load(Ordering::Relaxed);
        f.debug_tuple("SmrPtrWriter").field(&ptr).finish()
    }
}
