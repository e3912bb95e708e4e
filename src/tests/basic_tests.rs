/// 基础测试模块
/// 测试临界区、延迟调用和检测扫描的核心功能
use super::{bump, DropCounter};
use crate::state::INACTIVE_EPOCH;
use crate::SmrDomain;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn slot_epoch(domain: &SmrDomain, index: usize) -> usize {
    domain.shared.contexts.lock()[index]
        .active_epoch
        .load(Ordering::SeqCst)
}

/// 测试1: 创建域和上下文
#[test]
fn test_create_domain_and_context() {
    let domain = SmrDomain::new();
    let _context = domain.register_context();

    let stats = domain.stats();
    assert_eq!(stats.contexts, 1);
    assert_eq!(stats.epoch, 0);
    assert_eq!(stats.pending, 0);
}

/// 测试2: 进入/离开临界区循环
#[test]
fn test_enter_leave_cycle() {
    let domain = SmrDomain::new();
    let context = domain.register_context();

    assert!(!context.in_critical());
    {
        let _guard = context.enter_read();
        assert!(context.in_critical());
        assert_eq!(slot_epoch(&domain, 0), 0);
    }
    assert!(!context.in_critical());
    assert_eq!(slot_epoch(&domain, 0), INACTIVE_EPOCH);

    let guard = context.enter_read();
    guard.leave();
    assert!(!context.in_critical());
    assert_eq!(slot_epoch(&domain, 0), INACTIVE_EPOCH);
}

/// 测试3: 进入临界区时捕获当前全局纪元
#[test]
fn test_enter_read_captures_current_epoch() {
    let domain = SmrDomain::new();
    let context = domain.register_context();

    domain.flush();
    domain.flush();
    let epoch = domain.stats().epoch;
    assert!(epoch >= 2);

    let _guard = context.enter_read();
    assert_eq!(slot_epoch(&domain, 0), epoch);
}

/// 测试4: 嵌套守卫保持最外层捕获的纪元
#[test]
fn test_nested_guards_keep_outer_epoch() {
    let domain = SmrDomain::new();
    let context = domain.register_context();

    let outer = context.enter_read();
    let outer_epoch = slot_epoch(&domain, 0);

    // 推进纪元，嵌套进入不应改变已捕获的纪元
    domain.poll();
    domain.defer(|| {});
    domain.poll();

    let inner = context.enter_read();
    let cloned = outer.clone();
    assert_eq!(slot_epoch(&domain, 0), outer_epoch);

    drop(inner);
    drop(outer);
    assert!(context.in_critical());
    assert_eq!(slot_epoch(&domain, 0), outer_epoch);

    drop(cloned);
    assert!(!context.in_critical());
    assert_eq!(slot_epoch(&domain, 0), INACTIVE_EPOCH);
}

/// 测试5: defer 从不同步运行回调
#[test]
fn test_defer_never_runs_synchronously() {
    let domain = SmrDomain::new();
    let counter = Arc::new(AtomicUsize::new(0));

    domain.defer(bump(&counter));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(domain.stats().pending, 1);

    domain.barrier();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(domain.stats().pending, 0);
}

/// 测试6: 函数指针 + 参数形式的延迟调用
#[test]
fn test_defer_call_with_argument() {
    fn release(counter: Arc<AtomicUsize>) {
        counter.fetch_add(10, Ordering::SeqCst);
    }

    let domain = SmrDomain::new();
    let counter = Arc::new(AtomicUsize::new(0));

    domain.defer_call(Arc::clone(&counter), release);
    domain.defer_call(Arc::clone(&counter), release);
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    domain.barrier();
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}

/// 测试7: retire 在宽限期后 drop 值
#[test]
fn test_retire_drops_after_grace_period() {
    let domain = SmrDomain::new();
    let drops = Arc::new(AtomicUsize::new(0));

    domain.retire(Box::new(DropCounter(Arc::clone(&drops))));
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    domain.barrier();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试8: 没有活跃读者时 poll 释放所有条目
#[test]
fn test_poll_without_readers_releases_everything() {
    let domain = SmrDomain::new();
    let _idle_context = domain.register_context();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        domain.defer(bump(&counter));
    }

    assert_eq!(domain.poll(), Some(5));
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}

/// 测试9: 空队列上的 poll 不推进纪元
#[test]
fn test_poll_on_empty_queue_is_a_no_op() {
    let domain = SmrDomain::new();

    assert_eq!(domain.poll(), Some(0));
    let stats = domain.stats();
    assert_eq!(stats.epoch, 0);
    assert_eq!(stats.passes, 0);
}

/// 测试10: 临界区断言
#[test]
fn test_critical_section_assertions() {
    let domain = SmrDomain::new();
    let context = domain.register_context();

    context.assert_not_in_critical();
    let guard = context.enter_read();
    context.assert_in_critical();
    assert!(std::ptr::eq(guard.context(), &context));
    drop(guard);
    context.assert_not_in_critical();
}

/// 测试11: 在临界区外断言处于临界区会 panic（仅调试构建）
#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "inside a read-side critical section")]
fn test_assert_in_critical_outside_section_panics() {
    let domain = SmrDomain::new();
    let context = domain.register_context();
    context.assert_in_critical();
}

/// 测试12: 在临界区内调用 idle 会 panic（仅调试构建）
#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "outside any read-side critical section")]
fn test_idle_inside_section_panics() {
    let domain = SmrDomain::new();
    let context = domain.register_context();
    let _guard = context.enter_read();
    context.idle();
}

/// 测试13: 统计信息
#[test]
fn test_stats_track_deferred_and_completed() {
    let domain = SmrDomain::new();
    let counter = Arc::new(AtomicUsize::new(0));

    domain.defer(bump(&counter));
    domain.defer(bump(&counter));
    domain.defer(bump(&counter));

    let before = domain.stats();
    assert_eq!(before.deferred, 3);
    assert_eq!(before.completed, 0);
    assert_eq!(before.pending, 3);

    domain.barrier();

    let after = domain.stats();
    assert_eq!(after.deferred, 3);
    assert_eq!(after.completed, 3);
    assert_eq!(after.pending, 0);
    assert!(after.passes >= 1);
    assert!(after.epoch >= 1);
}

/// 测试14: idle 在没有后台线程时就地推进回收
#[test]
fn test_idle_reclaims_inline() {
    let domain = SmrDomain::new();
    let context = domain.register_context();
    let counter = Arc::new(AtomicUsize::new(0));

    domain.defer(bump(&counter));
    context.idle();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // 没有待处理调用时 idle 什么都不做
    let passes = domain.stats().passes;
    context.idle();
    assert_eq!(domain.stats().passes, passes);
}
