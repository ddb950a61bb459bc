//! 纪元（generation）跟踪与延迟回收
//!
//! ```text
//!   writer:  modify ──► transfer_hold_lists(G) ──► inc_generation() ──► trim_hold_lists(first_used)
//!   reader:  take_guard() ──► read ... ──► drop(guard)
//! ```
//!
//! 读线程持有 [`GenerationGuard`] 期间，该纪元及之后挂起的资源都不会被释放。
//! 被替换的资源在写线程的 hold list 上以当时的纪元打标签，只有当所有
//! 可能观察到它的读纪元都结束（`tag < first_used_generation`）才真正释放。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use crate::common::Generation;

// ── GenerationHold ────────────────────────────────────────────────────────────

struct GenerationHold {
    generation: Generation,
    /// >= 0 为读者计数；-1 表示已被写线程回收，不能再获取
    ref_count:  AtomicIsize,
}

const RETIRED: isize = -1;

impl GenerationHold {
    fn new(generation: Generation) -> Self {
        Self { generation, ref_count: AtomicIsize::new(0) }
    }

    fn try_acquire(&self) -> bool {
        let mut cur = self.ref_count.load(Ordering::Acquire);
        loop {
            if cur < 0 { return false; }
            match self.ref_count.compare_exchange_weak(
                cur, cur + 1, Ordering::AcqRel, Ordering::Acquire,
            ) {
                Ok(_)       => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    fn release(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "generation guard released twice");
    }

    fn try_retire(&self) -> bool {
        self.ref_count
            .compare_exchange(0, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn readers(&self) -> usize {
        self.ref_count.load(Ordering::Acquire).max(0) as usize
    }
}

struct Shared {
    current:    ArcSwap<GenerationHold>,
    generation: AtomicU64,
}

// ── GenerationGuard ───────────────────────────────────────────────────────────

/// 读者持有的纪元凭证，drop 即退出该纪元
pub struct GenerationGuard {
    hold: Arc<GenerationHold>,
}

impl GenerationGuard {
    pub fn generation(&self) -> Generation { self.hold.generation }
}

impl Clone for GenerationGuard {
    fn clone(&self) -> Self {
        // 自身仍持有计数，该 hold 不可能已被回收
        self.hold.ref_count.fetch_add(1, Ordering::AcqRel);
        Self { hold: self.hold.clone() }
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) { self.hold.release(); }
}

impl std::fmt::Debug for GenerationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGuard").field("generation", &self.hold.generation).finish()
    }
}

// ── GenerationReader ──────────────────────────────────────────────────────────

/// 可跨线程克隆的读端句柄
#[derive(Clone)]
pub struct GenerationReader {
    shared: Arc<Shared>,
}

impl GenerationReader {
    /// 进入当前纪元（无锁）
    pub fn take_guard(&self) -> GenerationGuard {
        loop {
            let hold = self.shared.current.load_full();
            if hold.try_acquire() {
                return GenerationGuard { hold };
            }
            // 读到的 hold 恰好被写线程回收，重新读取 current
        }
    }

    pub fn current_generation(&self) -> Generation {
        self.shared.generation.load(Ordering::Acquire)
    }
}

// ── GenerationHandler ─────────────────────────────────────────────────────────

/// 写线程独占的纪元计数器
pub struct GenerationHandler {
    shared:     Arc<Shared>,
    /// 已被替换的旧纪元，按纪元递增
    old_holds:  VecDeque<Arc<GenerationHold>>,
    first_used: Generation,
}

impl GenerationHandler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            current:    ArcSwap::from_pointee(GenerationHold::new(0)),
            generation: AtomicU64::new(0),
        });
        Self { shared, old_holds: VecDeque::new(), first_used: 0 }
    }

    pub fn current_generation(&self) -> Generation {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn first_used_generation(&self) -> Generation { self.first_used }

    pub fn reader(&self) -> GenerationReader {
        GenerationReader { shared: self.shared.clone() }
    }

    pub fn take_guard(&self) -> GenerationGuard { self.reader().take_guard() }

    /// 发布下一个纪元，之后新读者都会进入新纪元
    pub fn inc_generation(&mut self) {
        let next = self.current_generation() + 1;
        let old  = self.shared.current.swap(Arc::new(GenerationHold::new(next)));
        self.shared.generation.store(next, Ordering::Release);
        self.old_holds.push_back(old);
        self.update_first_used_generation();
        trace!(generation = next, first_used = self.first_used, "generation advanced");
    }

    /// 按顺序回收已无读者的旧纪元，返回最老的仍可能被读者使用的纪元
    pub fn update_first_used_generation(&mut self) -> Generation {
        while let Some(front) = self.old_holds.front() {
            if !front.try_retire() { break; }
            self.old_holds.pop_front();
        }
        self.first_used = self.old_holds
            .front()
            .map(|h| h.generation)
            .unwrap_or_else(|| self.current_generation());
        self.first_used
    }

    /// 当前所有纪元上的读者总数
    pub fn reader_count(&self) -> usize {
        let old: usize = self.old_holds.iter().map(|h| h.readers()).sum();
        old + self.shared.current.load().readers()
    }
}

impl Default for GenerationHandler {
    fn default() -> Self { Self::new() }
}

// ── GenerationHoldList ────────────────────────────────────────────────────────

/// 按纪元延迟释放的资源列表
#[derive(Debug)]
pub struct GenerationHoldList<T> {
    pending: Vec<T>,
    held:    VecDeque<(Generation, T)>,
}

impl<T> Default for GenerationHoldList<T> {
    fn default() -> Self {
        Self { pending: Vec::new(), held: VecDeque::new() }
    }
}

impl<T> GenerationHoldList<T> {
    pub fn new() -> Self { Self::default() }

    /// 挂起一个被替换的资源，纪元标签在 `transfer` 时确定
    pub fn insert(&mut self, item: T) { self.pending.push(item); }

    /// 将挂起资源打上当前纪元标签
    pub fn transfer(&mut self, generation: Generation) {
        debug_assert!(
            self.held.back().map(|(g, _)| *g <= generation).unwrap_or(true),
            "hold list generations must be non-decreasing",
        );
        for item in self.pending.drain(..) {
            self.held.push_back((generation, item));
        }
    }

    /// 取出所有纪元严格早于 `first_used` 的资源
    pub fn trim(&mut self, first_used: Generation) -> Vec<T> {
        let mut released = Vec::new();
        while self.held.front().map(|(g, _)| *g < first_used).unwrap_or(false) {
            if let Some((_, item)) = self.held.pop_front() {
                released.push(item);
            }
        }
        if !released.is_empty() {
            trace!(first_used, released = released.len(), "hold list trimmed");
        }
        released
    }

    pub fn len(&self) -> usize { self.pending.len() + self.held.len() }
    /// 已打上纪元标签、等待回收的数量
    pub fn held_count(&self) -> usize { self.held.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.pending.iter().chain(self.held.iter().map(|(_, item)| item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_used_follows_oldest_guard() {
        let mut gh = GenerationHandler::new();
        let g0 = gh.take_guard();
        assert_eq!(g0.generation(), 0);

        gh.inc_generation();
        gh.inc_generation();
        assert_eq!(gh.current_generation(), 2);
        assert_eq!(gh.first_used_generation(), 0);

        let g2 = gh.take_guard();
        drop(g0);
        assert_eq!(gh.update_first_used_generation(), 2);
        assert_eq!(g2.generation(), 2);
        assert_eq!(gh.reader_count(), 1);
    }

    #[test]
    fn first_used_is_current_without_readers() {
        let mut gh = GenerationHandler::new();
        for _ in 0..5 { gh.inc_generation(); }
        assert_eq!(gh.first_used_generation(), 5);
        assert_eq!(gh.reader_count(), 0);
    }

    #[test]
    fn cloned_guard_keeps_generation_pinned() {
        let mut gh = GenerationHandler::new();
        let g = gh.take_guard();
        let g2 = g.clone();
        drop(g);
        gh.inc_generation();
        assert_eq!(gh.first_used_generation(), 0);
        drop(g2);
        assert_eq!(gh.update_first_used_generation(), 1);
    }

    #[test]
    fn hold_list_releases_strictly_older() {
        let mut hl = GenerationHoldList::new();
        hl.insert("a");
        hl.transfer(3);
        hl.insert("b");
        hl.transfer(4);
        assert_eq!(hl.len(), 2);
        assert!(hl.trim(3).is_empty());
        assert_eq!(hl.trim(4), vec!["a"]);
        assert_eq!(hl.trim(10), vec!["b"]);
        assert!(hl.is_empty());
    }

    #[test]
    fn guards_across_threads() {
        let mut gh = GenerationHandler::new();
        let reader = gh.reader();
        std::thread::scope(|s| {
            for _ in 0..4 {
                let r = reader.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        let g = r.take_guard();
                        assert!(g.generation() <= r.current_generation());
                    }
                });
            }
            for _ in 0..100 {
                gh.inc_generation();
            }
        });
        assert_eq!(gh.update_first_used_generation(), 100);
    }
}
