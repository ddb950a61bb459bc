//! 多值映射的 buffer 存储
//!
//! - [`CellBuffer`]：SMALL 桶，按元素计容量，每个文档占连续 `values` 个单元
//! - [`LargeVectors`]：LARGE 池，每条记录是一个独立分配的不可变向量

use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::arena::BufferStorage;
use crate::field_type::AtomicValue;

pub struct CellBuffer<T: AtomicValue> {
    cells: Box<[T::Cell]>,
}

impl<T: AtomicValue> CellBuffer<T> {
    /// 与 `store` 配对：原地改写的元素所引用的数据对读线程可见
    pub fn load(&self, i: usize) -> T { T::load(&self.cells[i], Ordering::Acquire) }

    pub fn store(&self, i: usize, v: T) { T::store(&self.cells[i], v, Ordering::Release) }

    pub fn write(&self, start: usize, values: &[T]) {
        for (i, &v) in values.iter().enumerate() {
            self.store(start + i, v);
        }
    }
}

impl<T: AtomicValue> BufferStorage for CellBuffer<T> {
    fn with_capacity(records: usize) -> Self {
        Self { cells: (0..records).map(|_| T::new_cell(T::default())).collect() }
    }

    fn grown_from(old: &Self, used: usize, records: usize) -> Self {
        let new = Self::with_capacity(records);
        for i in 0..used {
            new.store(i, old.load(i));
        }
        new
    }

    fn capacity(&self) -> usize { self.cells.len() }
}

pub struct LargeVectors<T> {
    slots: Box<[ArcSwapOption<Vec<T>>]>,
}

impl<T> LargeVectors<T> {
    pub fn get(&self, i: usize) -> Option<Arc<Vec<T>>> { self.slots[i].load_full() }

    pub fn set(&self, i: usize, v: Option<Arc<Vec<T>>>) { self.slots[i].store(v) }
}

impl<T: AtomicValue> BufferStorage for LargeVectors<T> {
    fn with_capacity(records: usize) -> Self {
        Self { slots: (0..records).map(|_| ArcSwapOption::empty()).collect() }
    }

    fn grown_from(old: &Self, used: usize, records: usize) -> Self {
        let new = Self::with_capacity(records);
        for i in 0..used {
            new.set(i, old.get(i));
        }
        new
    }

    fn capacity(&self) -> usize { self.slots.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grown_buffers_keep_prefix() {
        let cells = CellBuffer::<i64>::with_capacity(4);
        cells.write(0, &[1, 2, 3]);
        let grown = CellBuffer::grown_from(&cells, 2, 8);
        assert_eq!(grown.capacity(), 8);
        assert_eq!((grown.load(0), grown.load(1), grown.load(2)), (1, 2, 0));

        let large = LargeVectors::<u32>::with_capacity(2);
        large.set(0, Some(Arc::new(vec![7u32; 20])));
        let grown = LargeVectors::grown_from(&large, 1, 4);
        assert_eq!(grown.get(0).unwrap().len(), 20);
        assert!(grown.get(1).is_none());
    }
}
