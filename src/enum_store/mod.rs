//! Enum Store：去重值 arena + 有序字典
//!
//! ```text
//!   lookup_or_insert(v) ──► Dictionary.find ──hit──► EnumIndex
//!                                 │miss
//!                                 ▼
//!                     BufferArena.allocate(1) ──► EnumRecord{value, ref_count, ordinal}
//!                                 │
//!                     Dictionary.insert(有序位置)
//! ```
//!
//! 引用计数由调用方维护：每获得一个逻辑引用调用一次 `inc_ref_count`，
//! 每失去一个调用一次 `dec_ref_count`。计数归零的记录在
//! `free_unused_enums` 时移出字典并标记为 dead，空间由 compaction 回收。

pub mod dictionary;
pub mod index;
pub mod record;

use std::cmp::Ordering;
use std::ops::Deref;
use std::sync::atomic::{fence, Ordering as MemOrder};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::arena::{BufferArena, BufferTable};
use crate::common::{AddressSpace, BufferId, Generation, MemoryUsage};
use crate::config::{CompactionStrategy, EnumStoreConfig};
use crate::field_type::EnumValue;

pub use dictionary::{DictEntry, Dictionary, PostingRef};
pub use index::EnumIndex;
pub use record::{EnumRecord, EnumRecords};

/// compaction 产生的旧索引 → 新索引映射
pub type EnumIndexMap = FxHashMap<EnumIndex, EnumIndex>;

/// 一轮 `free_unused_enums` 的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FreedEnums {
    pub count:             usize,
    /// 随条目一起失去归属的 posting list，由调用方释放
    pub orphaned_postings: Vec<PostingRef>,
}

/// 两阶段 compaction 的计划：`pre_compact` 生成，`compact_records` 填充映射，
/// `post_compact` 收尾
#[derive(Debug)]
pub struct EnumCompactionPlan {
    pub from:  Option<BufferId>,
    pub to:    BufferId,
    pub remap: EnumIndexMap,
}

fn record_of<T: EnumValue>(arena: &BufferArena<EnumRecords<T>>, idx: EnumIndex) -> &EnumRecord<T> {
    arena.storage(idx.buffer_id()).get(idx.offset())
}

fn value_of<T: EnumValue>(arena: &BufferArena<EnumRecords<T>>, idx: EnumIndex) -> &T {
    match record_of(arena, idx).value() {
        Some(v) => v,
        None    => panic!("enum record {idx:?} was never initialized"),
    }
}

// ── EnumStore ─────────────────────────────────────────────────────────────────

pub struct EnumStore<T: EnumValue> {
    arena:      BufferArena<EnumRecords<T>>,
    dict:       Dictionary,
    frozen:     Arc<ArcSwap<Dictionary>>,
    /// 引用计数降到 0 的候选记录
    unused:     Vec<EnumIndex>,
    enum_count: usize,
    /// 字典自上次 `re_enumerate` 后有增删
    stale:      bool,
    heap_bytes: usize,
}

impl<T: EnumValue> EnumStore<T> {
    pub fn new(config: &EnumStoreConfig) -> Self {
        Self {
            arena: BufferArena::new(
                "enum store",
                index::NUM_BUFFERS,
                config.grow,
                index::MAX_OFFSET,
                std::mem::size_of::<EnumRecord<T>>(),
            ),
            dict:       Dictionary::new(),
            frozen:     Arc::new(ArcSwap::from_pointee(Dictionary::new())),
            unused:     Vec::new(),
            enum_count: 0,
            stale:      false,
            heap_bytes: 0,
        }
    }

    // ── 值访问 ────────────────────────────────────────────────────────────────

    pub fn value(&self, idx: EnumIndex) -> &T { value_of(&self.arena, idx) }

    pub fn ref_count(&self, idx: EnumIndex) -> u32 { record_of(&self.arena, idx).ref_count() }

    pub fn num_unique(&self) -> usize { self.dict.len() }

    pub fn find_index(&self, value: &T) -> Option<EnumIndex> {
        let arena = &self.arena;
        let pos = self.dict.find(|k| value_of(arena, k).compare(value))?;
        self.dict.entry_at(pos).map(|e| e.key)
    }

    /// 字典序遍历全部索引
    pub fn iter_sorted(&self) -> impl Iterator<Item = EnumIndex> + '_ {
        self.dict.iter().map(|e| e.key)
    }

    /// `lo <= v <= hi` 的所有索引，按值有序
    pub fn find_range(&self, lo: &T, hi: &T) -> Vec<EnumIndex> {
        let arena = &self.arena;
        let start = self.dict.lower_bound(|k| value_of(arena, k).compare(lo));
        self.dict
            .iter_from(start)
            .take_while(|e| value_of(arena, e.key).compare(hi) != Ordering::Greater)
            .map(|e| e.key)
            .collect()
    }

    /// 与 `value` 折叠相等的所有索引（例如大小写不同的字符串）
    pub fn find_folded(&self, value: &T) -> Vec<EnumIndex> {
        let arena = &self.arena;
        let start = self.dict.lower_bound(|k| value_of(arena, k).fold_compare(value));
        self.dict
            .iter_from(start)
            .take_while(|e| value_of(arena, e.key).fold_compare(value) == Ordering::Equal)
            .map(|e| e.key)
            .collect()
    }

    // ── 插入与引用计数 ────────────────────────────────────────────────────────

    /// 查找或插入。命中时调用方需另行 `inc_ref_count`；新记录的计数为 0。
    pub fn lookup_or_insert(&mut self, value: &T) -> EnumIndex {
        if let Some(idx) = self.find_index(value) {
            return idx;
        }
        let (buffer, offset) = self.arena.allocate(1);
        let idx = EnumIndex::new(buffer, offset);
        self.arena.storage(buffer).get(offset).init(value.clone());
        self.heap_bytes += value.heap_bytes();

        let arena = &self.arena;
        let inserted = self.dict.insert(|k| value_of(arena, k).compare(value), DictEntry::new(idx));
        debug_assert!(inserted, "value was absent a moment ago");
        self.stale = true;
        self.adopt_run_posting(idx);
        idx
    }

    /// 新条目成为折叠组的首个条目时，从原组首接过 posting list
    fn adopt_run_posting(&mut self, idx: EnumIndex) {
        let arena = &self.arena;
        let value = value_of(arena, idx);
        let head  = self.dict.lower_bound(|k| value_of(arena, k).fold_compare(value));
        if self.dict.entry_at(head).map(|e| e.key) != Some(idx) {
            return;
        }
        let next = self.dict.next(head);
        let inherited = match self.dict.entry_at(next) {
            Some(e) if value_of(arena, e.key).fold_compare(value) == Ordering::Equal => e.posting,
            _ => None,
        };
        if let Some(p) = inherited {
            if let Some(e) = self.dict.entry_at_mut(next) { e.posting = None; }
            if let Some(e) = self.dict.entry_at_mut(head) { e.posting = Some(p); }
        }
    }

    pub fn inc_ref_count(&mut self, idx: EnumIndex) {
        let rec = record_of(&self.arena, idx);
        let n = rec.ref_count().checked_add(1)
            .unwrap_or_else(|| panic!("ref count overflow for {idx:?}"));
        rec.set_ref_count(n);
    }

    pub fn dec_ref_count(&mut self, idx: EnumIndex) {
        let rec = record_of(&self.arena, idx);
        let n = rec.ref_count();
        assert!(n > 0, "ref count underflow for {idx:?}");
        rec.set_ref_count(n - 1);
        if n == 1 {
            self.unused.push(idx);
        }
    }

    // ── 回收 ──────────────────────────────────────────────────────────────────

    /// 释放计数归零的候选记录
    pub fn free_unused_enums(&mut self) -> FreedEnums {
        let candidates = std::mem::take(&mut self.unused);
        self.free_candidates(candidates)
    }

    /// 扫描整个字典释放所有计数为 0 的记录
    pub fn free_unused_enums_all(&mut self) -> FreedEnums {
        let arena = &self.arena;
        let candidates: Vec<EnumIndex> = self.dict
            .iter()
            .map(|e| e.key)
            .filter(|&k| record_of(arena, k).ref_count() == 0)
            .collect();
        self.unused.clear();
        self.free_candidates(candidates)
    }

    fn free_candidates(&mut self, candidates: Vec<EnumIndex>) -> FreedEnums {
        let mut freed = FreedEnums::default();
        for idx in candidates {
            if self.free_one(idx, &mut freed) {
                freed.count += 1;
            }
        }
        if freed.count > 0 {
            debug!(freed = freed.count, unique = self.dict.len(), "freed unused enums");
        }
        freed
    }

    fn free_one(&mut self, idx: EnumIndex, freed: &mut FreedEnums) -> bool {
        let heap = {
            let arena = &self.arena;
            if record_of(arena, idx).ref_count() != 0 {
                return false;
            }
            let value = value_of(arena, idx);
            let Some(pos) = self.dict.find(|k| value_of(arena, k).compare(value)) else {
                return false;
            };
            // 同一索引可能多次成为候选，已被释放过的不再处理
            if self.dict.entry_at(pos).map(|e| e.key) != Some(idx) {
                return false;
            }
            let removed = self.dict.remove_at(pos);
            if let Some(posting) = removed.posting {
                let next = self.dict.normalize(pos);
                let heir = matches!(
                    self.dict.entry_at(next),
                    Some(e) if value_of(arena, e.key).fold_compare(value) == Ordering::Equal
                );
                match self.dict.entry_at_mut(next) {
                    Some(e) if heir => e.posting = Some(posting),
                    _ => freed.orphaned_postings.push(posting),
                }
            }
            value.heap_bytes()
        };
        self.heap_bytes -= heap;
        self.arena.mark_dead(idx.buffer_id(), 1);
        self.stale = true;
        true
    }

    // ── Posting list ──────────────────────────────────────────────────────────

    /// 折叠组首条目的位置
    fn run_head(&self, value: &T) -> Option<dictionary::Position> {
        let arena = &self.arena;
        let pos = self.dict.lower_bound(|k| value_of(arena, k).fold_compare(value));
        match self.dict.entry_at(pos) {
            Some(e) if value_of(arena, e.key).fold_compare(value) == Ordering::Equal => Some(pos),
            _ => None,
        }
    }

    /// 为 `idx` 所在的折叠组设置 posting list
    pub fn set_posting(&mut self, idx: EnumIndex, posting: Option<PostingRef>) {
        let Some(pos) = self.run_head(self.value(idx)) else {
            panic!("set_posting on {idx:?} which is not in the dictionary");
        };
        if let Some(e) = self.dict.entry_at_mut(pos) {
            e.posting = posting;
        }
    }

    pub fn posting(&self, idx: EnumIndex) -> Option<PostingRef> {
        let pos = self.run_head(self.value(idx))?;
        self.dict.entry_at(pos).and_then(|e| e.posting)
    }

    // ── 枚举序号 ──────────────────────────────────────────────────────────────

    /// 按字典序给每条记录写入 0..N-1 的序号，返回 N
    pub fn re_enumerate(&mut self) -> usize {
        let arena = &self.arena;
        let mut n = 0u32;
        for e in self.dict.iter() {
            record_of(arena, e.key).set_ordinal(n);
            n += 1;
        }
        fence(MemOrder::Release);
        self.enum_count = n as usize;
        self.stale = false;
        debug!(count = n, "re-enumerated dictionary");
        self.enum_count
    }

    pub fn ordinal(&self, idx: EnumIndex) -> u32 { record_of(&self.arena, idx).ordinal() }

    pub fn enum_count(&self) -> usize { self.enum_count }

    pub fn is_enumeration_stale(&self) -> bool { self.stale }

    // ── Compaction ────────────────────────────────────────────────────────────

    pub fn should_compact(&self, strategy: &CompactionStrategy) -> bool {
        let a = self.arena.address_space();
        strategy.should_compact(a.used, a.dead)
    }

    /// 第一阶段：选定一个 Free buffer 作为新的 Active，旧 buffer 进入 Hold。
    /// 没有 Free buffer 时返回 None，什么也不做。
    pub fn pre_compact(&mut self, bytes_needed: usize) -> Option<EnumCompactionPlan> {
        let record_bytes = std::mem::size_of::<EnumRecord<T>>();
        let extra = bytes_needed.div_ceil(record_bytes);
        let (from, to) = self.arena.switch_active(extra)?;
        debug!(?from, to, live = self.dict.len(), "enum store compaction started");
        let mut remap = EnumIndexMap::default();
        remap.reserve(self.dict.len());
        Some(EnumCompactionPlan { from, to, remap })
    }

    /// 按字典序把所有存活记录复制进新 buffer，并改写字典 key
    pub fn compact_records(&mut self, plan: &mut EnumCompactionPlan) {
        let to_move: Vec<EnumIndex> = self.dict
            .iter()
            .map(|e| e.key)
            .filter(|k| k.buffer_id() != plan.to)
            .collect();
        let (buffer, start) = self.arena.allocate(to_move.len());
        assert_eq!(buffer, plan.to, "compaction target is no longer active");

        let storage = self.arena.storage(buffer);
        for (i, &old) in to_move.iter().enumerate() {
            let src = record_of(&self.arena, old);
            let dst = storage.get(start + i);
            if let Some(v) = src.value() {
                dst.init(v.clone());
            }
            dst.set_ref_count(src.ref_count());
            dst.set_ordinal(src.ordinal());
            plan.remap.insert(old, EnumIndex::new(buffer, start + i));
        }

        let remap = &plan.remap;
        self.dict.remap_keys(|k| remap.get(&k).copied().unwrap_or(k));
        self.unused = self.unused
            .iter()
            .filter_map(|&k| if k.buffer_id() == plan.to { Some(k) } else { remap.get(&k).copied() })
            .collect();
    }

    /// 第二阶段：确定新的枚举数量，返回映射供调用方改写引用
    pub fn post_compact(&mut self, plan: EnumCompactionPlan) -> EnumIndexMap {
        self.enum_count = self.dict.len();
        debug!(moved = plan.remap.len(), to = plan.to, "enum store compaction finished");
        plan.remap
    }

    // ── 批量装载 ──────────────────────────────────────────────────────────────

    /// 在空 store 中按字典序装载值与引用计数
    pub(crate) fn load_sorted(&mut self, values: Vec<T>, ref_counts: &[u32]) -> Vec<EnumIndex> {
        assert!(self.dict.is_empty(), "bulk load requires an empty enum store");
        assert_eq!(values.len(), ref_counts.len());
        let (buffer, start) = self.arena.allocate(values.len());
        let mut indexes = Vec::with_capacity(values.len());
        for (i, (value, &rc)) in values.into_iter().zip(ref_counts).enumerate() {
            let idx = EnumIndex::new(buffer, start + i);
            self.heap_bytes += value.heap_bytes();
            let rec = self.arena.storage(buffer).get(start + i);
            rec.init(value);
            rec.set_ref_count(rc);
            if rc == 0 {
                self.unused.push(idx);
            }
            self.dict.push_back(DictEntry::new(idx));
            indexes.push(idx);
        }
        self.stale = true;
        indexes
    }

    // ── 纪元与统计 ────────────────────────────────────────────────────────────

    /// 发布当前字典的冻结快照给读线程
    pub fn freeze_dictionary(&mut self) {
        self.frozen.store(Arc::new(self.dict.clone()));
    }

    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.arena.transfer_hold_lists(generation);
    }

    pub fn trim_hold_lists(&mut self, first_used: Generation) {
        self.arena.trim_hold_lists(first_used);
    }

    pub fn address_space(&self) -> AddressSpace { self.arena.address_space() }

    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.arena.memory_usage();
        usage.allocated += self.heap_bytes;
        usage.used      += self.heap_bytes;
        usage
    }

    pub fn reader(&self) -> EnumStoreReader<T> {
        EnumStoreReader { table: self.arena.table(), frozen: self.frozen.clone() }
    }
}

// ── EnumStoreReader ───────────────────────────────────────────────────────────

/// 读端：经 buffer 表解析值，经冻结字典查找。应在纪元 guard 内使用。
pub struct EnumStoreReader<T> {
    table:  Arc<BufferTable<EnumRecords<T>>>,
    frozen: Arc<ArcSwap<Dictionary>>,
}

impl<T> Clone for EnumStoreReader<T> {
    fn clone(&self) -> Self {
        Self { table: self.table.clone(), frozen: self.frozen.clone() }
    }
}

impl<T: EnumValue> EnumStoreReader<T> {
    pub fn get(&self, idx: EnumIndex) -> EnumValueRef<T> {
        match self.table.get(idx.buffer_id()) {
            Some(storage) => EnumValueRef { storage, offset: idx.offset() },
            None => panic!("enum buffer {} released while {idx:?} is referenced", idx.buffer_id()),
        }
    }

    pub fn find_index(&self, value: &T) -> Option<EnumIndex> {
        let dict = self.frozen.load();
        let pos  = dict.find(|k| self.get(k).compare(value))?;
        dict.entry_at(pos).map(|e| e.key)
    }

    pub fn find_range(&self, lo: &T, hi: &T) -> Vec<EnumIndex> {
        let dict  = self.frozen.load();
        let start = dict.lower_bound(|k| self.get(k).compare(lo));
        dict.iter_from(start)
            .take_while(|e| self.get(e.key).compare(hi) != Ordering::Greater)
            .map(|e| e.key)
            .collect()
    }

    pub fn iter_sorted(&self) -> Vec<EnumIndex> {
        self.frozen.load().iter().map(|e| e.key).collect()
    }

    pub fn num_unique(&self) -> usize { self.frozen.load().len() }
}

/// 指向一条已发布记录的值，持有其所在存储
pub struct EnumValueRef<T> {
    storage: Arc<EnumRecords<T>>,
    offset:  usize,
}

impl<T> Deref for EnumValueRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.storage.get(self.offset).value() {
            Some(v) => v,
            None    => panic!("enum record at offset {} not published", self.offset),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for EnumValueRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

impl<T: PartialEq> PartialEq<T> for EnumValueRef<T> {
    fn eq(&self, other: &T) -> bool { **self == *other }
}
