//! Safe memory reclamation (SMR) for lock-free readers.
//!
//! Readers traverse shared structures inside short read-side critical
//! sections without taking locks; writers unlink nodes under their own lock and
//! defer the reclamation of those nodes until every reader that might still see
//! them has left its section.
//!
//! - [`SmrDomain`]: the global epoch, the context registry, the deferred-call
//!   queue and the grace-period detector. `defer`, `barrier`, `flush` live here.
//! - [`SmrContext`] / [`ReadGuard`]: per-context critical sections.
//! - [`SmrSList`] / [`SmrList`]: singly- and doubly-linked lists with a locked
//!   writer API and a lock-free reader API.
//! - [`SmrPtr`]: a single guard-protected heap value.
//!
//! ```
//! use smr_epoch::{SmrDomain, SmrList};
//! use std::sync::Mutex;
//!
//! let domain = SmrDomain::new();
//! let (writer, list) = SmrList::new(&domain);
//! let writer = Mutex::new(writer);
//!
//! for name in ["a", "b", "c"] {
//!     writer.lock().unwrap().insert_tail_locked(name);
//! }
//!
//! let context = domain.register_context();
//! let guard = context.enter_read();
//! let a = list.first(&guard).unwrap();
//!
//! // A writer unlinks "b" while the reader stands on "a".
//! let retired = writer.lock().unwrap().remove_locked(|v| *v == "b").unwrap();
//! retired.retire();
//!
//! assert_eq!(*a.next().unwrap(), "c");
//! drop(guard);
//!
//! domain.barrier();
//! ```
//!
//! 面向无锁读者的安全内存回收（SMR）。读者在短小的读侧临界区内无锁遍历共享结构；
//! 写者在自己的锁下摘除节点，并把节点的回收推迟到所有可能仍看到它们的读者都离开临界区之后。

mod context;
mod deferred;
mod detector;
mod domain;
mod list;
mod reclaimer;
mod state;
mod sync;

pub use context::{ReadGuard, SmrContext};
pub use domain::{SmrDomain, SmrDomainBuilder, SmrStats};
pub use list::{
    ListIter, ListNodeRef, ListWriter, Retired, SListIter, SListNodeRef, SListWriter, SmrList,
    SmrPtr, SmrPtrWriter, SmrSList,
};

#[cfg(test)]
mod tests;
