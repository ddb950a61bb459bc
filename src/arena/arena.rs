//! BufferArena：固定编号的 buffer 集合 + 单个 Active buffer + 纪元 hold list

use std::sync::Arc;

use tracing::debug;

use crate::arena::buffer::{BufferState, BufferStorage, BufferTable};
use crate::arena::grow::grow_size;
use crate::common::{AddressSpace, BufferId, Generation, MemoryUsage};
use crate::config::GrowStrategy;
use crate::generation::GenerationHoldList;

struct BufferMeta<S> {
    state:   BufferState,
    used:    usize,
    dead:    usize,
    /// 写线程缓存的当前存储，与 BufferTable 中发布的一致
    storage: Option<Arc<S>>,
}

impl<S> BufferMeta<S> {
    fn free() -> Self {
        Self { state: BufferState::Free, used: 0, dead: 0, storage: None }
    }
}

enum Held<S> {
    /// 整个 buffer 待回收（Hold → Free）
    Buffer(BufferId),
    /// fallback resize 替换下来的旧存储
    Storage(Arc<S>),
}

/// 单写者 buffer 池。所有修改都要求 `&mut self`；读线程经 [`BufferTable`] 访问。
pub struct BufferArena<S: BufferStorage> {
    name:         &'static str,
    table:        Arc<BufferTable<S>>,
    buffers:      Vec<BufferMeta<S>>,
    active:       Option<BufferId>,
    grow:         GrowStrategy,
    /// 单个 buffer 可寻址的最大记录数
    limit:        usize,
    record_bytes: usize,
    holds:        GenerationHoldList<Held<S>>,
}

impl<S: BufferStorage> BufferArena<S> {
    pub fn new(
        name:         &'static str,
        num_buffers:  usize,
        grow:         GrowStrategy,
        limit:        usize,
        record_bytes: usize,
    ) -> Self {
        assert!(num_buffers > 0, "{name}: arena needs at least one buffer");
        Self {
            name,
            table:   Arc::new(BufferTable::new(num_buffers)),
            buffers: (0..num_buffers).map(|_| BufferMeta::free()).collect(),
            active:  None,
            grow, limit, record_bytes,
            holds:   GenerationHoldList::new(),
        }
    }

    // ── 查询 ──────────────────────────────────────────────────────────────────

    pub fn name(&self) -> &'static str { self.name }
    pub fn table(&self) -> Arc<BufferTable<S>> { self.table.clone() }
    pub fn num_buffers(&self) -> usize { self.buffers.len() }
    pub fn limit(&self) -> usize { self.limit }
    pub fn active_buffer_id(&self) -> Option<BufferId> { self.active }

    pub fn state(&self, id: BufferId) -> BufferState { self.buffers[id as usize].state }
    pub fn used(&self, id: BufferId) -> usize { self.buffers[id as usize].used }
    pub fn dead(&self, id: BufferId) -> usize { self.buffers[id as usize].dead }

    pub fn capacity(&self, id: BufferId) -> usize {
        self.buffers[id as usize].storage.as_ref().map(|s| s.capacity()).unwrap_or(0)
    }

    /// 写线程访问 buffer 存储；访问 Free buffer 属于调用方错误
    pub fn storage(&self, id: BufferId) -> &S {
        match &self.buffers[id as usize].storage {
            Some(s) => s,
            None    => panic!("{}: buffer {id} has no storage ({:?})", self.name, self.state(id)),
        }
    }

    pub fn try_storage(&self, id: BufferId) -> Option<&S> {
        self.buffers[id as usize].storage.as_deref()
    }

    /// Active buffer 的剩余容量
    pub fn remaining(&self) -> usize {
        self.active
            .map(|id| self.capacity(id) - self.used(id))
            .unwrap_or(0)
    }

    pub fn buffers_in_state(&self, state: BufferState) -> Vec<BufferId> {
        (0..self.buffers.len() as BufferId)
            .filter(|&id| self.state(id) == state)
            .collect()
    }

    // ── 分配 ──────────────────────────────────────────────────────────────────

    /// 在 Active buffer 上分配 `n` 条连续记录，返回 (buffer, 起始偏移)
    pub fn allocate(&mut self, n: usize) -> (BufferId, usize) {
        self.ensure_capacity(n);
        let id   = self.active.expect("ensure_capacity leaves an active buffer");
        let meta = &mut self.buffers[id as usize];
        let offset = meta.used;
        meta.used += n;
        (id, offset)
    }

    /// 保证 Active buffer 至少还能容纳 `n` 条记录
    pub fn ensure_capacity(&mut self, n: usize) {
        match self.active {
            None => {
                self.switch_active(n);
            }
            Some(_) if self.remaining() < n => self.fallback_resize(n),
            Some(_) => {}
        }
    }

    /// 原地扩容 Active buffer：已分配偏移保持不变，旧存储挂到 hold list，
    /// 已经发给读线程的视图继续指向旧存储。
    pub fn fallback_resize(&mut self, n: usize) {
        let id = match self.active {
            Some(id) => id,
            None     => { self.switch_active(n); return; }
        };
        let used    = self.used(id);
        let old_cap = self.capacity(id);
        let new_cap = grow_size(used, 0, n, self.limit, &self.grow, self.name);
        if new_cap <= old_cap {
            return;
        }

        let meta = &mut self.buffers[id as usize];
        let old  = meta.storage.take().expect("active buffer has storage");
        let new  = Arc::new(S::grown_from(&old, used, new_cap));
        meta.storage = Some(new.clone());
        self.table.publish(id, Some(new));
        self.holds.insert(Held::Storage(old));
        debug!(arena = self.name, buffer = id, old_cap, new_cap, "fallback resize");
    }

    /// 切换到一个 Free buffer 作为新的 Active，旧 Active 转为 Hold。
    ///
    /// 新容量按旧 buffer 的存活记录加 `n` 计算。没有 Free buffer 时返回 None。
    pub fn switch_active(&mut self, n: usize) -> Option<(Option<BufferId>, BufferId)> {
        let old = self.active;
        let new = (0..self.buffers.len() as BufferId)
            .find(|&id| Some(id) != old && self.state(id) == BufferState::Free)?;

        let (used, dead) = old.map(|id| (self.used(id), self.dead(id))).unwrap_or((0, 0));
        let cap = grow_size(used, dead, n, self.limit, &self.grow, self.name);

        let storage = Arc::new(S::with_capacity(cap));
        let meta = &mut self.buffers[new as usize];
        meta.state.activate();
        meta.used    = 0;
        meta.dead    = 0;
        meta.storage = Some(storage.clone());
        self.table.publish(new, Some(storage));
        self.active = Some(new);

        if let Some(id) = old {
            self.hold_buffer(id);
        }
        debug!(arena = self.name, from = ?old, to = new, capacity = cap, "switched active buffer");
        Some((old, new))
    }

    /// 记录逻辑删除（`used` 不变）
    pub fn mark_dead(&mut self, id: BufferId, n: usize) {
        let meta = &mut self.buffers[id as usize];
        meta.dead += n;
        assert!(
            meta.dead <= meta.used,
            "{}: buffer {id} dead {} exceeds used {}", self.name, meta.dead, meta.used,
        );
    }

    /// Active → Hold，并登记到 hold list
    pub fn hold_buffer(&mut self, id: BufferId) {
        self.buffers[id as usize].state.hold();
        if self.active == Some(id) {
            self.active = None;
        }
        self.holds.insert(Held::Buffer(id));
    }

    // ── 纪元 ──────────────────────────────────────────────────────────────────

    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.holds.transfer(generation);
    }

    /// 释放所有纪元早于 `first_used` 的挂起资源：Hold buffer 转为 Free 并丢弃存储
    pub fn trim_hold_lists(&mut self, first_used: Generation) {
        for held in self.holds.trim(first_used) {
            match held {
                Held::Buffer(id) => {
                    let meta = &mut self.buffers[id as usize];
                    meta.state.release();
                    meta.used    = 0;
                    meta.dead    = 0;
                    meta.storage = None;
                    self.table.publish(id, None);
                }
                Held::Storage(old) => drop(old),
            }
        }
    }

    pub fn has_held(&self) -> bool { !self.holds.is_empty() }

    // ── 统计 ──────────────────────────────────────────────────────────────────

    /// Active buffer 的地址空间占用（记录数）
    pub fn address_space(&self) -> AddressSpace {
        match self.active {
            Some(id) => AddressSpace::new(self.used(id), self.dead(id), self.limit),
            None     => AddressSpace::new(0, 0, self.limit),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let rb = self.record_bytes;
        let mut usage = MemoryUsage::default();
        for meta in &self.buffers {
            let cap = meta.storage.as_ref().map(|s| s.capacity()).unwrap_or(0);
            usage.allocated += cap * rb;
            usage.used      += meta.used * rb;
            usage.dead      += meta.dead * rb;
            if meta.state == BufferState::Hold {
                usage.on_hold += cap * rb;
            }
        }
        for held in self.holds.iter() {
            if let Held::Storage(s) = held {
                usage.allocated += s.capacity() * rb;
                usage.on_hold   += s.capacity() * rb;
            }
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Cells(Box<[AtomicU32]>);

    impl BufferStorage for Cells {
        fn with_capacity(records: usize) -> Self {
            Cells((0..records).map(|_| AtomicU32::new(0)).collect())
        }
        fn grown_from(old: &Self, used: usize, records: usize) -> Self {
            let new = Self::with_capacity(records);
            for i in 0..used {
                new.0[i].store(old.0[i].load(Ordering::Relaxed), Ordering::Relaxed);
            }
            new
        }
        fn capacity(&self) -> usize { self.0.len() }
    }

    fn arena(limit: usize) -> BufferArena<Cells> {
        let grow = GrowStrategy::default().initial_capacity(4).alignment(1).grow_delta(2);
        BufferArena::new("test", 2, grow, limit, 4)
    }

    #[test]
    fn allocate_bumps_used_and_grows_in_place() {
        let mut a = arena(1000);
        let (b, off) = a.allocate(3);
        assert_eq!((b, off), (0, 0));
        a.storage(b).0[2].store(7, Ordering::Relaxed);

        let reader_view = a.table().get(b).unwrap();
        let (b2, off2) = a.allocate(3);
        assert_eq!((b2, off2), (0, 3));
        assert!(a.capacity(0) >= 6);
        // 扩容后数据被复制，读线程已有视图仍指向旧存储
        assert_eq!(a.storage(0).0[2].load(Ordering::Relaxed), 7);
        assert_eq!(reader_view.capacity(), 5);
        assert!(a.memory_usage().on_hold > 0);

        a.transfer_hold_lists(0);
        a.trim_hold_lists(1);
        assert_eq!(a.memory_usage().on_hold, 0);
    }

    #[test]
    fn switch_active_holds_old_until_trim() {
        let mut a = arena(1000);
        a.allocate(4);
        a.mark_dead(0, 3);

        let (old, new) = a.switch_active(1).unwrap();
        assert_eq!((old, new), (Some(0), 1));
        assert_eq!(a.state(0), BufferState::Hold);
        assert_eq!(a.state(1), BufferState::Active);
        assert!(a.table().get(0).is_some());
        // 没有第三个 buffer 可用
        assert!(a.switch_active(1).is_none());

        a.transfer_hold_lists(5);
        a.trim_hold_lists(5);
        assert_eq!(a.state(0), BufferState::Hold);
        a.trim_hold_lists(6);
        assert_eq!(a.state(0), BufferState::Free);
        assert!(a.table().get(0).is_none());
        assert_eq!(a.buffers_in_state(BufferState::Free), vec![0]);
    }

    #[test]
    fn address_space_reports_active_buffer() {
        let mut a = arena(1000);
        a.allocate(5);
        a.mark_dead(0, 2);
        assert_eq!(a.address_space(), AddressSpace::new(5, 2, 1000));
    }

    #[test]
    #[should_panic(expected = "exceeds maximum size")]
    fn growth_past_limit_is_fatal() {
        let mut a = arena(8);
        a.allocate(4);
        a.allocate(4);
        a.allocate(1);
    }

    #[test]
    #[should_panic(expected = "exceeds used")]
    fn dead_cannot_exceed_used() {
        let mut a = arena(100);
        a.allocate(1);
        a.mark_dead(0, 2);
    }
}
