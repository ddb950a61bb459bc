//! Enum Store 的 buffer 存储：每条记录 = 值 + 引用计数 + 枚举序号

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crate::arena::BufferStorage;
use crate::field_type::EnumValue;

pub struct EnumRecord<T> {
    /// 分配后写入一次，之后只读
    value:     OnceLock<T>,
    /// 仅写线程修改；为 0 时记录未被任何文档引用
    ref_count: AtomicU32,
    /// `re_enumerate` 写入的字典序序号
    ordinal:   AtomicU32,
}

impl<T> EnumRecord<T> {
    fn empty() -> Self {
        Self { value: OnceLock::new(), ref_count: AtomicU32::new(0), ordinal: AtomicU32::new(0) }
    }

    pub fn value(&self) -> Option<&T> { self.value.get() }

    pub(crate) fn init(&self, value: T) {
        assert!(self.value.set(value).is_ok(), "enum record written twice");
    }

    pub fn ref_count(&self) -> u32 { self.ref_count.load(Ordering::Relaxed) }

    pub(crate) fn set_ref_count(&self, n: u32) { self.ref_count.store(n, Ordering::Relaxed); }

    pub fn ordinal(&self) -> u32 { self.ordinal.load(Ordering::Acquire) }

    pub(crate) fn set_ordinal(&self, n: u32) { self.ordinal.store(n, Ordering::Relaxed); }
}

pub struct EnumRecords<T> {
    records: Box<[EnumRecord<T>]>,
}

impl<T> EnumRecords<T> {
    pub fn get(&self, offset: usize) -> &EnumRecord<T> { &self.records[offset] }
}

impl<T: EnumValue> BufferStorage for EnumRecords<T> {
    fn with_capacity(records: usize) -> Self {
        Self { records: (0..records).map(|_| EnumRecord::empty()).collect() }
    }

    fn grown_from(old: &Self, used: usize, records: usize) -> Self {
        let new = Self::with_capacity(records);
        for (dst, src) in new.records.iter().zip(old.records.iter().take(used)) {
            if let Some(v) = src.value() {
                dst.init(v.clone());
            }
            dst.set_ref_count(src.ref_count());
            dst.set_ordinal(src.ordinal.load(Ordering::Relaxed));
        }
        new
    }

    fn capacity(&self) -> usize { self.records.len() }
}
