//! SMR-protected intrusive-style lists and a single-pointer cell.
//!
//! Each list is created as a pair: a cloneable reader handle used inside
//! read-side critical sections, and a unique writer handle whose methods take
//! `&mut self`. Writers serialize by putting the writer handle behind a lock of
//! their choice, so "must hold the writer lock" is checked by the borrow
//! checker.
//!
//! Nodes are heap allocated and linked through `AtomicPtr`s. A writer fully
//! initializes a node before publishing it with a Release store; readers follow
//! links with Acquire loads. A removed node keeps its own links untouched and is
//! handed out as a [`Retired`] value, so a reader already standing on it can
//! still walk off it until the node's grace period ends. [`SmrPtr`] applies
//! the same publication rules to one heap value.
//!
//! SMR 保护的链表。每个链表成对创建：一个在读侧临界区内使用的可克隆读者句柄，
//! 以及一个方法接收 `&mut self` 的唯一写者句柄。被移除的节点保留自己的链接，
//! 并以 [`Retired`] 的形式交出。[`SmrPtr`] 对单个堆上的值使用相同的发布规则。

mod dlist;
mod ptr;
mod retired;
mod slist;

pub use dlist::{ListIter, ListNodeRef, ListWriter, SmrList};
pub use ptr::{SmrPtr, SmrPtrWriter};
pub use retired::Retired;
pub use slist::{SListIter, SListNodeRef, SListWriter, SmrSList};
