//! 去重 Attribute：值经 Enum Store 去重，文档槽位保存 EnumIndex

use tracing::{debug, trace};

use crate::attribute::{check_collection, AddressSpaceUsage};
use crate::common::{DocId, Generation, MemoryUsage};
use crate::config::AttributeConfig;
use crate::enum_store::{
    EnumCompactionPlan, EnumIndex, EnumIndexMap, EnumStore, EnumStoreReader, EnumValueRef,
};
use crate::field_type::EnumValue;
use crate::generation::{GenerationGuard, GenerationHandler, GenerationReader};
use crate::multi_value::{Index32, IndexFormat, MultiValueMapping, MultiValueReader, ValueSlice};

pub struct EnumAttribute<T: EnumValue, F: IndexFormat = Index32> {
    name:       String,
    config:     AttributeConfig,
    store:      EnumStore<T>,
    mapping:    MultiValueMapping<EnumIndex, F>,
    generation: GenerationHandler,
    /// `intern_or_get` 交给调用方、尚未 `release` 的引用数
    held_refs:  usize,
}

impl<T: EnumValue, F: IndexFormat> EnumAttribute<T, F> {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        Self {
            name:       name.into(),
            store:      EnumStore::new(&config.enum_store),
            mapping:    MultiValueMapping::new(&config.multi_value),
            generation: GenerationHandler::new(),
            held_refs:  0,
            config,
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn config(&self) -> &AttributeConfig { &self.config }
    pub fn num_docs(&self) -> usize { self.mapping.num_docs() }
    pub fn enum_store(&self) -> &EnumStore<T> { &self.store }
    pub fn mapping(&self) -> &MultiValueMapping<EnumIndex, F> { &self.mapping }
    pub fn current_generation(&self) -> Generation { self.generation.current_generation() }

    pub fn add_doc(&mut self) -> DocId { self.mapping.add_doc() }

    // ── 值 ────────────────────────────────────────────────────────────────────

    /// 去重并返回一个归调用方所有的引用（计数 +1），用完调用 `release`。
    /// 存在未释放的引用时 `commit` 不搬迁 Enum Store，已交出的索引保持有效。
    pub fn intern_or_get(&mut self, value: &T) -> EnumIndex {
        let idx = self.store.lookup_or_insert(value);
        self.store.inc_ref_count(idx);
        self.held_refs += 1;
        idx
    }

    pub fn release(&mut self, idx: EnumIndex) {
        assert!(self.held_refs > 0, "release of {idx:?} without a matching intern_or_get");
        self.store.dec_ref_count(idx);
        self.held_refs -= 1;
    }

    pub fn held_refs(&self) -> usize { self.held_refs }

    pub fn resolve(&self, idx: EnumIndex) -> &T { self.store.value(idx) }

    pub fn find_enum(&self, value: &T) -> Option<EnumIndex> { self.store.find_index(value) }

    // ── 文档 ──────────────────────────────────────────────────────────────────

    /// 新值计数 +1，被替换的旧值计数 -1
    pub fn set_values(&mut self, doc: DocId, values: &[EnumIndex]) {
        check_collection(self.config.collection, doc, values.len());
        let old = self.mapping.get(doc);
        for &v in values {
            self.store.inc_ref_count(v);
        }
        self.mapping.set(doc, values);
        for v in old.iter() {
            self.store.dec_ref_count(v);
        }
    }

    pub fn set_raw_values(&mut self, doc: DocId, values: &[T]) {
        check_collection(self.config.collection, doc, values.len());
        let indexes: Vec<EnumIndex> = values.iter().map(|v| self.store.lookup_or_insert(v)).collect();
        self.set_values(doc, &indexes);
    }

    pub fn clear_doc(&mut self, doc: DocId) { self.set_values(doc, &[]); }

    pub fn get_values(&self, doc: DocId) -> ValueSlice<EnumIndex> { self.mapping.get(doc) }

    pub fn get_raw_values(&self, doc: DocId) -> Vec<T> {
        self.mapping.get(doc).iter().map(|i| self.store.value(i).clone()).collect()
    }

    pub fn value_count(&self, doc: DocId) -> usize { self.mapping.value_count(doc) }

    // ── Enum Store compaction ─────────────────────────────────────────────────

    /// 显式 compaction 不检查 `held_refs`：调用方持有的索引需按 `end_compaction`
    /// 返回的映射自行改写
    pub fn begin_compaction(&mut self, bytes_needed: usize) -> Option<EnumCompactionPlan> {
        self.store.pre_compact(bytes_needed)
    }

    /// 搬迁记录并把所有文档中的旧索引改写为新索引。
    /// 新旧索引指向相等的值，逐元素原地改写对读线程可见的结果不变。
    pub fn apply_compaction(&mut self, plan: &mut EnumCompactionPlan) {
        self.store.compact_records(plan);
        let mut rewritten = 0usize;
        let mut buf = Vec::new();
        for doc in 0..self.mapping.num_docs() as DocId {
            let values = self.mapping.get(doc);
            if !values.iter().any(|v| plan.remap.contains_key(&v)) {
                continue;
            }
            buf.clear();
            buf.extend(values.iter().map(|v| plan.remap.get(&v).copied().unwrap_or(v)));
            self.mapping.replace_in_place(doc, &buf);
            rewritten += 1;
        }
        debug!(attribute = %self.name, rewritten, "remapped enum references");
    }

    pub fn end_compaction(&mut self, plan: EnumCompactionPlan) -> EnumIndexMap {
        let remap = self.store.post_compact(plan);
        self.store.freeze_dictionary();
        remap
    }

    // ── commit ────────────────────────────────────────────────────────────────

    pub fn commit(&mut self) {
        let freed = self.store.free_unused_enums();
        if !freed.orphaned_postings.is_empty() {
            trace!(attribute = %self.name, postings = freed.orphaned_postings.len(), "dropped orphaned postings");
        }

        if self.store.should_compact(&self.config.compaction) {
            if self.held_refs > 0 {
                debug!(attribute = %self.name, held = self.held_refs, "enum compaction deferred");
            } else if let Some(mut plan) = self.begin_compaction(0) {
                self.apply_compaction(&mut plan);
                self.end_compaction(plan);
            }
        }
        self.mapping.compact_worst(&self.config.compaction);

        if self.store.is_enumeration_stale() {
            self.store.re_enumerate();
        }
        self.store.freeze_dictionary();

        let current = self.generation.current_generation();
        self.store.transfer_hold_lists(current);
        self.mapping.transfer_hold_lists(current);
        self.generation.inc_generation();
        let first_used = self.generation.update_first_used_generation();
        self.store.trim_hold_lists(first_used);
        self.mapping.trim_hold_lists(first_used);
    }

    // ── 统计 ──────────────────────────────────────────────────────────────────

    pub fn address_space_usage(&self) -> AddressSpaceUsage {
        AddressSpaceUsage {
            enum_store:  Some(self.store.address_space()),
            multi_value: self.mapping.address_space(),
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = self.store.memory_usage();
        usage.merge(self.mapping.memory_usage());
        usage
    }

    pub fn reader(&self) -> EnumAttributeReader<T, F> {
        EnumAttributeReader {
            generation: self.generation.reader(),
            store:      self.store.reader(),
            mapping:    self.mapping.reader(),
        }
    }

    // ── 装载 ──────────────────────────────────────────────────────────────────

    /// 由已校验的有序唯一值、累计偏移与序号构建
    pub(crate) fn from_sorted(
        name:     String,
        config:   AttributeConfig,
        values:   Vec<T>,
        offsets:  &[u32],
        ordinals: &[u32],
    ) -> Self {
        let mut attr = Self::new(name, config);
        let mut ref_counts = vec![0u32; values.len()];
        for &o in ordinals {
            ref_counts[o as usize] += 1;
        }
        let indexes = attr.store.load_sorted(values, &ref_counts);

        attr.mapping.reserve_docs(offsets.len().saturating_sub(1));
        let mut buf = Vec::new();
        for w in offsets.windows(2) {
            let doc = attr.mapping.add_doc();
            buf.clear();
            buf.extend(ordinals[w[0] as usize..w[1] as usize].iter().map(|&o| indexes[o as usize]));
            attr.mapping.set(doc, &buf);
        }
        attr.store.re_enumerate();
        attr.store.freeze_dictionary();
        attr
    }
}

// ── EnumAttributeReader ───────────────────────────────────────────────────────

pub struct EnumAttributeReader<T, F: IndexFormat = Index32> {
    generation: GenerationReader,
    store:      EnumStoreReader<T>,
    mapping:    MultiValueReader<EnumIndex, F>,
}

impl<T, F: IndexFormat> Clone for EnumAttributeReader<T, F> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation.clone(),
            store:      self.store.clone(),
            mapping:    self.mapping.clone(),
        }
    }
}

impl<T: EnumValue, F: IndexFormat> EnumAttributeReader<T, F> {
    /// 进入当前纪元；持有期间读到的索引都可以安全解析
    pub fn guard(&self) -> GenerationGuard { self.generation.take_guard() }

    pub fn num_docs(&self) -> usize { self.mapping.num_docs() }

    pub fn get_values(&self, doc: DocId) -> ValueSlice<EnumIndex> { self.mapping.get(doc) }

    pub fn value_count(&self, doc: DocId) -> usize { self.mapping.value_count(doc) }

    pub fn resolve(&self, idx: EnumIndex) -> EnumValueRef<T> { self.store.get(idx) }

    pub fn get_raw_values(&self, doc: DocId) -> Vec<T> {
        let _guard = self.guard();
        self.mapping.get(doc).iter().map(|i| (*self.store.get(i)).clone()).collect()
    }

    /// 在最近一次 commit 冻结的字典中查找
    pub fn find_enum(&self, value: &T) -> Option<EnumIndex> {
        let _guard = self.guard();
        self.store.find_index(value)
    }
}
