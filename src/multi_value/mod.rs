//! Multi-Value Mapping：文档 → 定长值集合
//!
//! ```text
//!   docs: RcuVector<Word>          每文档一个打包索引
//!     │
//!     ├─ values == 0        空
//!     ├─ 1..max-1           SMALL 桶 [values]，buffer = alternative，连续 values 个单元
//!     └─ values == max      LARGE 池，buffer = alternative，独立分配的向量
//! ```
//!
//! 写入总是先把新值写进新分配的位置，再以 Release 发布文档索引；
//! 旧位置只记为 dead，旧 LARGE 向量挂在 hold list 上等读纪元退休。
//! 读线程以 Acquire 读索引后再访问 buffer 表，看到的要么是旧集合要么是新集合。

pub mod histogram;
pub mod index;
pub mod storage;

use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, trace};

use crate::arena::{BufferArena, BufferTable};
use crate::common::{AddressSpace, BufferId, DocId, Generation, MemoryUsage};
use crate::config::{CompactionStrategy, GrowStrategy, MultiValueConfig};
use crate::field_type::AtomicValue;
use crate::generation::GenerationHoldList;
use crate::rcu_vector::{RcuVector, RcuVectorReader};

pub use histogram::CapacityHistogram;
pub use index::{Index32, Index64, IndexFormat, MultiValueIndex};
pub use storage::{CellBuffer, LargeVectors};

const MAX_DOCS: usize = DocId::MAX as usize;

// ── 共享 buffer 表 ────────────────────────────────────────────────────────────

struct Tables<T: AtomicValue> {
    /// 下标 `values - 1`
    small: Vec<Arc<BufferTable<CellBuffer<T>>>>,
    large: Arc<BufferTable<LargeVectors<T>>>,
}

fn resolve<T: AtomicValue, F: IndexFormat>(tables: &Tables<T>, idx: MultiValueIndex<F>) -> ValueSlice<T> {
    let n = idx.values();
    if n == 0 {
        return ValueSlice { repr: Repr::Empty };
    }
    if idx.is_large() {
        let vector = tables.large
            .get(idx.alternative())
            .and_then(|buffer| buffer.get(idx.offset()));
        return match vector {
            Some(v) => ValueSlice { repr: Repr::Large(v) },
            None    => panic!("large vector for {idx:?} released while referenced"),
        };
    }
    match tables.small[n - 1].get(idx.alternative()) {
        Some(buffer) => ValueSlice { repr: Repr::Cells { buffer, start: idx.offset() * n, len: n } },
        None         => panic!("buffer for {idx:?} released while referenced"),
    }
}

// ── ValueSlice ────────────────────────────────────────────────────────────────

/// 一个文档值集合的只读视图，持有底层存储直到视图被丢弃
pub struct ValueSlice<T: AtomicValue> {
    repr: Repr<T>,
}

enum Repr<T: AtomicValue> {
    Empty,
    Cells { buffer: Arc<CellBuffer<T>>, start: usize, len: usize },
    Large(Arc<Vec<T>>),
}

impl<T: AtomicValue> ValueSlice<T> {
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Empty            => 0,
            Repr::Cells { len, .. } => *len,
            Repr::Large(v)         => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, i: usize) -> T {
        assert!(i < self.len(), "value index {i} out of bounds ({})", self.len());
        match &self.repr {
            Repr::Empty                         => unreachable!(),
            Repr::Cells { buffer, start, .. }   => buffer.load(start + i),
            Repr::Large(v)                      => v[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<T> { self.iter().collect() }
}

impl<T: AtomicValue> std::fmt::Debug for ValueSlice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ── MultiValueMapping ─────────────────────────────────────────────────────────

/// SMALL 桶以元素为单位分配：把按槽位给出的策略放大到 `values` 倍
fn bucket_strategy(g: &GrowStrategy, values: usize) -> GrowStrategy {
    GrowStrategy {
        initial_capacity: g.initial_capacity.saturating_mul(values),
        grow_percent:     g.grow_percent,
        grow_delta:       g.grow_delta.saturating_mul(values),
        alignment:        g.alignment.saturating_mul(values),
    }
}

pub struct MultiValueMapping<T: AtomicValue, F: IndexFormat = Index32> {
    docs:        RcuVector<F::Word>,
    small:       Vec<BufferArena<CellBuffer<T>>>,
    large:       BufferArena<LargeVectors<T>>,
    tables:      Arc<Tables<T>>,
    /// 被替换的 LARGE 向量 (buffer, offset)
    large_holds: GenerationHoldList<(BufferId, usize)>,
    large_bytes: usize,
}

impl<T: AtomicValue, F: IndexFormat> MultiValueMapping<T, F> {
    pub fn new(config: &MultiValueConfig) -> Self {
        let max   = MultiValueIndex::<F>::max_values();
        let alts  = MultiValueIndex::<F>::alternative_size() as usize;
        let slots = MultiValueIndex::<F>::offset_size();

        let small: Vec<_> = (1..max)
            .map(|n| BufferArena::new(
                "multi-value small",
                alts,
                bucket_strategy(&config.small, n),
                slots.saturating_mul(n),
                size_of::<T::Cell>(),
            ))
            .collect();
        let large = BufferArena::new(
            "multi-value large", alts, config.large, slots, size_of::<ArcSwapOption<Vec<T>>>(),
        );
        let tables = Arc::new(Tables {
            small: small.iter().map(|a| a.table()).collect(),
            large: large.table(),
        });
        Self {
            docs: RcuVector::new(config.docs, MAX_DOCS),
            small, large, tables,
            large_holds: GenerationHoldList::new(),
            large_bytes: 0,
        }
    }

    pub fn num_docs(&self) -> usize { self.docs.len() }

    /// 追加一个空文档
    pub fn add_doc(&mut self) -> DocId {
        let doc = self.docs.len() as DocId;
        self.docs.push(MultiValueIndex::<F>::empty().word());
        doc
    }

    pub fn reserve_docs(&mut self, n: usize) { self.docs.reserve(n); }

    pub fn index(&self, doc: DocId) -> MultiValueIndex<F> {
        MultiValueIndex::from_word(self.docs.get(doc as usize))
    }

    pub fn get(&self, doc: DocId) -> ValueSlice<T> { resolve(&self.tables, self.index(doc)) }

    pub fn value_count(&self, doc: DocId) -> usize {
        let idx = self.index(doc);
        if idx.is_large() { self.get(doc).len() } else { idx.values() }
    }

    /// 所有文档的值总数
    pub fn total_values(&self) -> u64 {
        (0..self.num_docs() as DocId).map(|d| self.value_count(d) as u64).sum()
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    /// 替换文档的整个值集合。读线程看到旧集合或新集合，不会看到混合。
    pub fn set(&mut self, doc: DocId, values: &[T]) {
        let old = self.index(doc);
        let new = self.store(values);
        self.docs.set(doc as usize, new.word());
        self.release(old);
    }

    /// 原地覆盖，值个数必须不变。读线程可能看到新旧元素的混合，
    /// 仅用于逐元素等价的改写（如 compaction 后的索引重映射）。
    pub fn replace_in_place(&mut self, doc: DocId, values: &[T]) {
        let idx = self.index(doc);
        if idx.is_large() {
            let storage = self.large.storage(idx.alternative());
            let current = storage.get(idx.offset()).map(|v| v.len()).unwrap_or(0);
            assert_eq!(current, values.len(), "replace_in_place requires an equal value count");
            storage.set(idx.offset(), Some(Arc::new(values.to_vec())));
            return;
        }
        let n = idx.values();
        assert_eq!(n, values.len(), "replace_in_place requires an equal value count");
        if n > 0 {
            self.small[n - 1].storage(idx.alternative()).write(idx.offset() * n, values);
        }
    }

    fn store(&mut self, values: &[T]) -> MultiValueIndex<F> {
        let n   = values.len();
        let max = MultiValueIndex::<F>::max_values();
        if n == 0 {
            return MultiValueIndex::empty();
        }
        if n < max {
            let arena = &mut self.small[n - 1];
            let (buffer, start) = arena.allocate(n);
            arena.storage(buffer).write(start, values);
            return MultiValueIndex::new(n, buffer, start / n);
        }
        let (buffer, offset) = self.large.allocate(1);
        self.large.storage(buffer).set(offset, Some(Arc::new(values.to_vec())));
        self.large_bytes += n * size_of::<T>();
        MultiValueIndex::new(max, buffer, offset)
    }

    fn release(&mut self, idx: MultiValueIndex<F>) {
        if idx.is_empty() {
            return;
        }
        if idx.is_large() {
            self.large.mark_dead(idx.alternative(), 1);
            self.large_holds.insert((idx.alternative(), idx.offset()));
        } else {
            let n = idx.values();
            self.small[n - 1].mark_dead(idx.alternative(), n);
        }
    }

    // ── 容量与 compaction ─────────────────────────────────────────────────────

    /// 直方图中的文档能否不经扩容直接写入
    pub fn enough_capacity(&self, histogram: &CapacityHistogram) -> bool {
        let max = MultiValueIndex::<F>::max_values();
        let mut large_docs = 0;
        for (values, docs) in histogram.iter() {
            if values < max {
                if self.small[values - 1].remaining() < values * docs {
                    return false;
                }
            } else {
                large_docs += docs;
            }
        }
        self.large.remaining() >= large_docs
    }

    /// 为直方图中的文档腾出容量。能切换到空闲的备选 buffer 时搬迁存活文档，
    /// 否则原地扩容当前 buffer。
    pub fn compact(&mut self, histogram: &CapacityHistogram) {
        let max = MultiValueIndex::<F>::max_values();
        let mut moved_small = Vec::new();
        let mut large_docs  = 0;
        for (values, docs) in histogram.iter() {
            if values >= max {
                large_docs += docs;
                continue;
            }
            let need  = values * docs;
            let arena = &mut self.small[values - 1];
            if arena.remaining() >= need {
                continue;
            }
            match arena.switch_active(need) {
                Some((Some(old), _)) => moved_small.push((values, old)),
                Some((None, _))      => {}
                None                 => arena.fallback_resize(need),
            }
        }

        let mut moved_large = None;
        if large_docs > 0 && self.large.remaining() < large_docs {
            match self.large.switch_active(large_docs) {
                Some((old, _)) => moved_large = old,
                None           => self.large.fallback_resize(large_docs),
            }
        }
        self.move_docs(&moved_small, moved_large);
    }

    /// 按 dead 比例从高到低尝试满足策略的桶，对第一个拿到 Free buffer 的桶做一次搬迁，
    /// 返回是否搬迁
    pub fn compact_worst(&mut self, strategy: &CompactionStrategy) -> bool {
        // (dead 比例, 值个数)，值个数为 None 表示 LARGE 池
        let mut candidates: Vec<(f64, Option<usize>)> = Vec::new();
        let mut consider = |a: AddressSpace, values: Option<usize>| {
            if a.used > 0 && strategy.should_compact(a.used, a.dead) {
                candidates.push((a.dead as f64 / a.used as f64, values));
            }
        };
        for (i, arena) in self.small.iter().enumerate() {
            let n = i + 1;
            let a = arena.address_space();
            consider(AddressSpace::new(a.used / n, a.dead / n, a.limit / n), Some(n));
        }
        consider(self.large.address_space(), None);
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, values) in candidates {
            let moved = match values {
                Some(n) => match self.small[n - 1].switch_active(0) {
                    Some((Some(old), _)) => { self.move_docs(&[(n, old)], None); true }
                    _ => false,
                },
                None => match self.large.switch_active(0) {
                    Some((Some(old), _)) => { self.move_docs(&[], Some(old)); true }
                    _ => false,
                },
            };
            if moved {
                return true;
            }
            trace!(bucket = ?values, "no free buffer, trying next bucket");
        }
        false
    }

    /// 把引用了给定旧 buffer 的文档复制到对应的 Active buffer 并重新发布索引
    fn move_docs(&mut self, small: &[(usize, BufferId)], large: Option<BufferId>) {
        if small.is_empty() && large.is_none() {
            return;
        }
        let max = MultiValueIndex::<F>::max_values();
        let mut moved = 0usize;
        for doc in 0..self.docs.len() {
            let idx = MultiValueIndex::<F>::from_word(self.docs.get(doc));
            if idx.is_empty() {
                continue;
            }
            let new: MultiValueIndex<F> = if idx.is_large() {
                if large != Some(idx.alternative()) {
                    continue;
                }
                let vector = self.large.storage(idx.alternative()).get(idx.offset());
                let (buffer, offset) = self.large.allocate(1);
                self.large.storage(buffer).set(offset, vector);
                MultiValueIndex::new(max, buffer, offset)
            } else {
                let n = idx.values();
                if !small.contains(&(n, idx.alternative())) {
                    continue;
                }
                let arena = &mut self.small[n - 1];
                let (buffer, start) = arena.allocate(n);
                let src = arena.storage(idx.alternative());
                let dst = arena.storage(buffer);
                for i in 0..n {
                    dst.store(start + i, src.load(idx.offset() * n + i));
                }
                MultiValueIndex::new(n, buffer, start / n)
            };
            self.docs.set(doc, new.word());
            moved += 1;
        }
        debug!(moved, buckets = small.len(), large = ?large, "multi-value compaction moved documents");
    }

    // ── 纪元与统计 ────────────────────────────────────────────────────────────

    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.docs.transfer_hold_lists(generation);
        self.large_holds.transfer(generation);
        for arena in &mut self.small {
            arena.transfer_hold_lists(generation);
        }
        self.large.transfer_hold_lists(generation);
    }

    pub fn trim_hold_lists(&mut self, first_used: Generation) {
        self.docs.trim_hold_lists(first_used);
        // 先清理 LARGE 槽位，之后 buffer 才可能被整体释放
        for (buffer, offset) in self.large_holds.trim(first_used) {
            let Some(storage) = self.large.try_storage(buffer) else { continue; };
            if let Some(v) = storage.get(offset) {
                self.large_bytes -= v.len() * size_of::<T>();
                storage.set(offset, None);
            }
        }
        for arena in &mut self.small {
            arena.trim_hold_lists(first_used);
        }
        self.large.trim_hold_lists(first_used);
    }

    /// 最紧张的桶的地址空间占用（SMALL 桶按文档槽位计）
    pub fn address_space(&self) -> AddressSpace {
        let mut worst = self.large.address_space();
        for (i, arena) in self.small.iter().enumerate() {
            let n = i + 1;
            let a = arena.address_space();
            let slots = AddressSpace::new(a.used / n, a.dead / n, a.limit / n);
            if slots.usage() > worst.usage() {
                worst = slots;
            }
        }
        worst
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.docs.memory_usage();
        for arena in &self.small {
            usage.merge(arena.memory_usage());
        }
        usage.merge(self.large.memory_usage());
        usage.allocated += self.large_bytes;
        usage.used      += self.large_bytes;
        usage
    }

    pub fn reader(&self) -> MultiValueReader<T, F> {
        MultiValueReader { docs: self.docs.reader(), tables: self.tables.clone(), _f: PhantomData }
    }
}

// ── MultiValueReader ──────────────────────────────────────────────────────────

pub struct MultiValueReader<T: AtomicValue, F: IndexFormat = Index32> {
    docs:   RcuVectorReader<F::Word>,
    tables: Arc<Tables<T>>,
    _f:     PhantomData<F>,
}

impl<T: AtomicValue, F: IndexFormat> Clone for MultiValueReader<T, F> {
    fn clone(&self) -> Self {
        Self { docs: self.docs.clone(), tables: self.tables.clone(), _f: PhantomData }
    }
}

impl<T: AtomicValue, F: IndexFormat> MultiValueReader<T, F> {
    pub fn num_docs(&self) -> usize { self.docs.len() }

    pub fn get(&self, doc: DocId) -> ValueSlice<T> {
        resolve(&self.tables, MultiValueIndex::<F>::from_word(self.docs.get(doc as usize)))
    }

    pub fn value_count(&self, doc: DocId) -> usize { self.get(doc).len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MultiValueConfig {
        let g = GrowStrategy::default().initial_capacity(4).alignment(1);
        MultiValueConfig::default().small(g).large(g).docs(g)
    }

    fn mapping() -> MultiValueMapping<i64> {
        MultiValueMapping::new(&config())
    }

    #[test]
    fn small_large_and_empty_docs() {
        let mut m = mapping();
        for _ in 0..3 {
            m.add_doc();
        }
        let large: Vec<i64> = (0..20).collect();
        m.set(0, &[1, 2, 3]);
        m.set(1, &large);
        assert_eq!(m.get(0).to_vec(), vec![1, 2, 3]);
        assert_eq!(m.get(1).to_vec(), large);
        assert!(m.get(2).is_empty());
        assert_eq!(m.value_count(1), 20);
        assert!(m.index(1).is_large());
        assert_eq!(m.index(0).vector_idx(), 6);
    }

    #[test]
    fn overwrite_marks_old_slot_dead() {
        let mut m = mapping();
        m.add_doc();
        m.set(0, &[1, 2, 3]);
        let view = m.get(0);
        m.set(0, &[4, 5]);
        assert_eq!(view.to_vec(), vec![1, 2, 3]);
        assert_eq!(m.get(0).to_vec(), vec![4, 5]);
        assert_eq!(m.small[2].dead(0), 3);
        m.set(0, &[]);
        assert_eq!(m.small[1].dead(0), 2);
        assert_eq!(m.value_count(0), 0);
    }

    #[test]
    fn large_vectors_are_released_after_trim() {
        let mut m = mapping();
        m.add_doc();
        m.set(0, &[7; 30]);
        let before = m.memory_usage().used;
        let view = m.get(0);
        m.set(0, &[8; 30]);
        assert_eq!(view.to_vec(), vec![7; 30]);
        m.transfer_hold_lists(3);
        m.trim_hold_lists(4);
        assert!(m.memory_usage().used <= before + size_of::<ArcSwapOption<Vec<i64>>>());
        assert_eq!(m.get(0).to_vec(), vec![8; 30]);
    }

    #[test]
    fn reader_follows_writer() {
        let mut m = mapping();
        let r = m.reader();
        m.add_doc();
        m.set(0, &[9, 9]);
        assert_eq!(r.num_docs(), 1);
        assert_eq!(r.get(0).to_vec(), vec![9, 9]);
        assert_eq!(r.value_count(0), 2);
    }

    #[test]
    fn compact_moves_bucket_to_free_alternative() {
        let mut m = mapping();
        for d in 0..4 {
            m.add_doc();
            m.set(d, &[d as i64, -(d as i64)]);
        }
        m.set(0, &[10, 11]);
        m.set(1, &[12, 13]);
        assert_eq!(m.small[1].dead(0), 4);

        let mut h = CapacityHistogram::new();
        h.add_docs(2, 10);
        assert!(!m.enough_capacity(&h));
        m.compact(&h);
        assert!(m.enough_capacity(&h));

        assert_eq!(m.small[1].active_buffer_id(), Some(1));
        assert_eq!(m.small[1].dead(1), 0);
        assert_eq!(m.get(0).to_vec(), vec![10, 11]);
        assert_eq!(m.get(1).to_vec(), vec![12, 13]);
        assert_eq!(m.get(3).to_vec(), vec![3, -3]);
        assert!(m.memory_usage().on_hold > 0);

        // 备选 buffer 仍处于 Hold，只能原地扩容
        let mut more = CapacityHistogram::new();
        more.add_docs(2, 100);
        m.compact(&more);
        assert!(m.enough_capacity(&more));
        assert_eq!(m.small[1].active_buffer_id(), Some(1));
    }

    #[test]
    fn compact_worst_picks_dirty_bucket() {
        let mut m = mapping();
        let strategy = CompactionStrategy::default().min_dead(1).max_dead_ratio(0.1);
        assert!(!m.compact_worst(&strategy));
        for d in 0..4 {
            m.add_doc();
            m.set(d, &[1, 2, 3]);
        }
        m.set(0, &[4, 5, 6]);
        assert!(m.compact_worst(&strategy));
        assert_eq!(m.get(0).to_vec(), vec![4, 5, 6]);
        assert_eq!(m.small[2].dead(1), 0);
    }

    #[test]
    fn compact_worst_skips_bucket_without_free_buffer() {
        let mut m = mapping();
        let strategy = CompactionStrategy::default().min_dead(1).max_dead_ratio(0.1);
        for d in 0..4 {
            m.add_doc();
            m.set(d, &[1, 2, 3]);
        }
        m.set(0, &[4, 5, 6]);
        assert!(m.compact_worst(&strategy));
        // 3 值桶的旧 buffer 仍在 Hold，两个 buffer 都不可用
        m.set(1, &[7, 8, 9]);

        for d in 4..12 {
            m.add_doc();
            m.set(d, &[1, 2]);
        }
        m.set(4, &[3, 4]);
        assert_eq!(m.small[1].active_buffer_id(), Some(0));

        assert!(m.compact_worst(&strategy));
        assert_eq!(m.small[1].active_buffer_id(), Some(1));
        assert_eq!(m.small[1].dead(1), 0);
        assert_eq!(m.small[2].dead(1), 3);
        assert_eq!(m.get(4).to_vec(), vec![3, 4]);
        assert_eq!(m.get(1).to_vec(), vec![7, 8, 9]);
    }

    #[test]
    fn replace_in_place_keeps_slot() {
        let mut m = mapping();
        m.add_doc();
        m.set(0, &[1, 2]);
        let before = m.index(0);
        m.replace_in_place(0, &[3, 4]);
        assert_eq!(m.index(0), before);
        assert_eq!(m.get(0).to_vec(), vec![3, 4]);
    }

    #[test]
    #[should_panic(expected = "equal value count")]
    fn replace_in_place_rejects_resize() {
        let mut m = mapping();
        m.add_doc();
        m.set(0, &[1, 2]);
        m.replace_in_place(0, &[1]);
    }

    #[test]
    fn address_space_reports_doc_slots() {
        let mut m = mapping();
        for d in 0..3 {
            m.add_doc();
            m.set(d, &[1, 2, 3, 4]);
        }
        let a = m.address_space();
        assert_eq!((a.used, a.dead), (3, 0));
        assert_eq!(a.limit, 1 << 27);
    }
}
