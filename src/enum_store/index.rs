//! EnumIndex：指向 Enum Store 中一条去重值记录的稳定句柄

use std::sync::atomic::{AtomicU32, Ordering};

use crate::common::BufferId;
use crate::field_type::AtomicValue;

/// 偏移位宽：单个 buffer 最多 2^24 条记录
pub const OFFSET_BITS: u32 = 24;
/// buffer 位宽：最多 2^8 个 buffer
pub const BUFFER_BITS: u32 = 32 - OFFSET_BITS;

pub const MAX_OFFSET: usize  = 1 << OFFSET_BITS;
pub const NUM_BUFFERS: usize = 1 << BUFFER_BITS;

/// `{buffer_id, offset}` 打包成 u32。索引本身的大小关系没有意义，
/// 值的顺序只能经由字典获得，因此不实现 `Ord`。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnumIndex(u32);

impl EnumIndex {
    pub fn new(buffer_id: BufferId, offset: usize) -> Self {
        assert!((buffer_id as usize) < NUM_BUFFERS, "enum buffer id {buffer_id} out of range");
        assert!(offset < MAX_OFFSET, "enum offset {offset} out of range");
        Self((buffer_id << OFFSET_BITS) | offset as u32)
    }

    pub fn buffer_id(self) -> BufferId { self.0 >> OFFSET_BITS }
    pub fn offset(self) -> usize { (self.0 & (MAX_OFFSET as u32 - 1)) as usize }

    pub fn raw(self) -> u32 { self.0 }
    pub fn from_raw(raw: u32) -> Self { Self(raw) }
}

impl std::fmt::Debug for EnumIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnumIndex({}:{})", self.buffer_id(), self.offset())
    }
}

impl AtomicValue for EnumIndex {
    type Cell = AtomicU32;

    #[inline]
    fn new_cell(v: Self) -> Self::Cell { AtomicU32::new(v.0) }
    #[inline]
    fn load(cell: &Self::Cell, order: Ordering) -> Self { Self(cell.load(order)) }
    #[inline]
    fn store(cell: &Self::Cell, v: Self, order: Ordering) { cell.store(v.0, order) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_buffer_and_offset() {
        let idx = EnumIndex::new(3, 12345);
        assert_eq!(idx.buffer_id(), 3);
        assert_eq!(idx.offset(), 12345);
        assert_eq!(EnumIndex::from_raw(idx.raw()), idx);
        assert_eq!(format!("{idx:?}"), "EnumIndex(3:12345)");
    }

    #[test]
    fn extremes() {
        let idx = EnumIndex::new(NUM_BUFFERS as u32 - 1, MAX_OFFSET - 1);
        assert_eq!(idx.raw(), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn offset_overflow_panics() {
        EnumIndex::new(0, MAX_OFFSET);
    }
}
