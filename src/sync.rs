use std::time::Duration;

#[cfg(feature = "loom")]
pub use loom::cell::Cell;
#[cfg(not(feature = "loom"))]
pub use std::cell::Cell;

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::Arc;
#[cfg(not(feature = "loom"))]
pub use std::sync::Arc;

#[cfg(not(feature = "loom"))]
pub use antidote::{Condvar, Mutex};

#[cfg(feature = "loom")]
#[derive(Debug, Default)]
pub struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(feature = "loom")]
impl<T> Mutex<T> {
    pub fn new(t: T) -> Self {
        Self(loom::sync::Mutex::new(t))
    }

    pub fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}

/// Sleep/wake point used by blocking waiters and the background reclaimer.
///
/// Waits are always bounded by a timeout, so a missed notification only costs
/// one pause.
///
/// 阻塞等待者和后台回收线程使用的休眠/唤醒点。
/// 等待总是有超时上限，因此错过一次通知只会多等一个暂停周期。
#[cfg(not(feature = "loom"))]
pub(crate) struct Parker {
    lock: Mutex<()>,
    cvar: Condvar,
}

#[cfg(not(feature = "loom"))]
impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn park_timeout(&self, timeout: Duration) {
        let guard = self.lock.lock();
        let _ = self.cvar.wait_timeout(guard, timeout);
    }

    pub(crate) fn unpark_all(&self) {
        self.cvar.notify_all();
    }
}

// Under loom nothing notifies a parked waiter when a reader leaves, so waiting
// degrades to a yield that lets the model schedule other threads.
#[cfg(feature = "loom")]
#[derive(Debug, Default)]
pub(crate) struct Parker;

#[cfg(feature = "loom")]
impl Parker {
    pub(crate) fn new() -> Self {
        Parker
    }

    pub(crate) fn park_timeout(&self, _timeout: Duration) {
        loom::thread::yield_now();
    }

    pub(crate) fn unpark_all(&self) {}
}
