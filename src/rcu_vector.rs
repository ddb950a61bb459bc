//! 纪元感知的稠密向量（文档槽位）
//!
//! 写线程扩容时分配更大的存储、复制后原子发布，旧存储挂在 hold list 上；
//! 读线程先读已提交长度，再读存储，永远不会看到未初始化的槽位。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::arena::grow_size;
use crate::common::{Generation, MemoryUsage};
use crate::config::GrowStrategy;
use crate::field_type::AtomicValue;
use crate::generation::GenerationHoldList;

struct Storage<V: AtomicValue> {
    cells: Box<[V::Cell]>,
}

impl<V: AtomicValue> Storage<V> {
    fn new(capacity: usize) -> Self {
        Self { cells: (0..capacity).map(|_| V::new_cell(V::default())).collect() }
    }
}

struct Shared<V: AtomicValue> {
    storage: ArcSwap<Storage<V>>,
    len:     AtomicUsize,
}

/// 单写者向量；读端见 [`RcuVectorReader`]
pub struct RcuVector<V: AtomicValue> {
    shared:  Arc<Shared<V>>,
    storage: Arc<Storage<V>>,
    len:     usize,
    grow:    GrowStrategy,
    limit:   usize,
    holds:   GenerationHoldList<Arc<Storage<V>>>,
}

impl<V: AtomicValue> RcuVector<V> {
    pub fn new(grow: GrowStrategy, limit: usize) -> Self {
        let storage = Arc::new(Storage::new(0));
        let shared  = Arc::new(Shared {
            storage: ArcSwap::new(storage.clone()),
            len:     AtomicUsize::new(0),
        });
        Self { shared, storage, len: 0, grow, limit, holds: GenerationHoldList::new() }
    }

    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }
    pub fn capacity(&self) -> usize { self.storage.cells.len() }

    pub fn get(&self, i: usize) -> V {
        assert!(i < self.len, "index {i} outside committed range {}", self.len);
        V::load(&self.storage.cells[i], Ordering::Acquire)
    }

    /// 以 Release 语义覆盖已提交的槽位
    pub fn set(&mut self, i: usize, v: V) {
        assert!(i < self.len, "index {i} outside committed range {}", self.len);
        V::store(&self.storage.cells[i], v, Ordering::Release);
    }

    pub fn push(&mut self, v: V) {
        if self.len == self.capacity() {
            self.reserve(1);
        }
        V::store(&self.storage.cells[self.len], v, Ordering::Relaxed);
        self.len += 1;
        self.shared.len.store(self.len, Ordering::Release);
    }

    /// 保证还能再追加 `additional` 个元素
    pub fn reserve(&mut self, additional: usize) {
        if self.capacity() - self.len >= additional {
            return;
        }
        let new_cap = grow_size(self.len, 0, additional, self.limit, &self.grow, "rcu vector");
        let new = Storage::<V>::new(new_cap);
        for (dst, src) in new.cells.iter().zip(self.storage.cells.iter().take(self.len)) {
            V::store(dst, V::load(src, Ordering::Relaxed), Ordering::Relaxed);
        }
        let new = Arc::new(new);
        let old = std::mem::replace(&mut self.storage, new.clone());
        self.shared.storage.store(new);
        debug!(old_cap = old.cells.len(), new_cap, "rcu vector grown");
        self.holds.insert(old);
    }

    pub fn reader(&self) -> RcuVectorReader<V> {
        RcuVectorReader { shared: self.shared.clone() }
    }

    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.holds.transfer(generation);
    }

    pub fn trim_hold_lists(&mut self, first_used: Generation) {
        drop(self.holds.trim(first_used));
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let cell = std::mem::size_of::<V::Cell>();
        let held: usize = self.holds.iter().map(|s| s.cells.len() * cell).sum();
        MemoryUsage {
            allocated: self.capacity() * cell + held,
            used:      self.len * cell,
            dead:      0,
            on_hold:   held,
        }
    }
}

/// 读端句柄，可克隆到任意线程
pub struct RcuVectorReader<V: AtomicValue> {
    shared: Arc<Shared<V>>,
}

impl<V: AtomicValue> Clone for RcuVectorReader<V> {
    fn clone(&self) -> Self { Self { shared: self.shared.clone() } }
}

impl<V: AtomicValue> RcuVectorReader<V> {
    pub fn len(&self) -> usize { self.shared.len.load(Ordering::Acquire) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, i: usize) -> V {
        let len = self.len();
        assert!(i < len, "index {i} outside committed range {len}");
        // 长度先于存储读取：长度发布时对应的存储必然已发布
        let storage = self.shared.storage.load();
        V::load(&storage.cells[i], Ordering::Acquire)
    }
}
