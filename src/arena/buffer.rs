//! Buffer 状态机与读端可见的 buffer 表

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::common::BufferId;

// ── BufferState ───────────────────────────────────────────────────────────────
//
//   Free ──activate──► Active ──hold──► Hold ──release──► Free
//
// Active: 承接新分配；Hold: 已被替换，等待读纪元退休；Free: 可作为下一个目标

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Active,
    Hold,
}

impl BufferState {
    pub fn activate(&mut self) { self.transition(Self::Free, Self::Active); }
    pub fn hold(&mut self) { self.transition(Self::Active, Self::Hold); }
    pub fn release(&mut self) { self.transition(Self::Hold, Self::Free); }

    fn transition(&mut self, from: Self, to: Self) {
        assert!(*self == from, "illegal buffer transition {:?} -> {:?}", self, to);
        *self = to;
    }
}

// ── BufferStorage ─────────────────────────────────────────────────────────────

/// 一个 buffer 的底层存储，容量以记录计
pub trait BufferStorage: Send + Sync + 'static {
    fn with_capacity(records: usize) -> Self;

    /// 新建容量为 `records` 的存储，并复制 `old` 的前 `used` 条记录
    fn grown_from(old: &Self, used: usize, records: usize) -> Self;

    fn capacity(&self) -> usize;
}

// ── BufferTable ───────────────────────────────────────────────────────────────

/// buffer id → 当前存储。读线程只经由这里访问数据，写线程替换存储时原子发布。
pub struct BufferTable<S> {
    slots: Box<[ArcSwapOption<S>]>,
}

impl<S> BufferTable<S> {
    pub fn new(num_buffers: usize) -> Self {
        let slots = (0..num_buffers).map(|_| ArcSwapOption::empty()).collect();
        Self { slots }
    }

    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    /// 读取 buffer 的当前存储；Free buffer 返回 None
    pub fn get(&self, id: BufferId) -> Option<Arc<S>> {
        self.slots[id as usize].load_full()
    }

    pub(crate) fn publish(&self, id: BufferId, storage: Option<Arc<S>>) {
        self.slots[id as usize].store(storage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle() {
        let mut s = BufferState::Free;
        s.activate();
        assert_eq!(s, BufferState::Active);
        s.hold();
        assert_eq!(s, BufferState::Hold);
        s.release();
        assert_eq!(s, BufferState::Free);
    }

    #[test]
    #[should_panic(expected = "illegal buffer transition")]
    fn free_cannot_be_held() {
        BufferState::Free.hold();
    }

    #[test]
    fn table_publishes_storage() {
        let t: BufferTable<Vec<u8>> = BufferTable::new(2);
        assert!(t.get(1).is_none());
        t.publish(1, Some(Arc::new(vec![1, 2])));
        assert_eq!(t.get(1).as_deref(), Some(&vec![1, 2]));
        assert_eq!(t.len(), 2);
    }
}
