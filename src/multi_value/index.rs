//! 每文档槽位索引：值个数 | 备选 buffer | 偏移，打包成一个机器字
//!
//! ```text
//!   Index32:  [ values:4 | alt:1 | offset:27 ]          u32
//!   Index64:  [ values:10 | alt:1 | offset:53 ]         u64
//! ```
//!
//! `values == 0` 表示空文档；`values == max_values()` 表示 LARGE，
//! 此时偏移指向 LARGE 池中的一个向量，真实长度存在向量本身。

use std::fmt::Debug;
use std::marker::PhantomData;

use crate::field_type::AtomicValue;

pub trait IndexFormat: Copy + Debug + Default + PartialEq + Eq + Send + Sync + 'static {
    type Word: AtomicValue;

    const VALUE_BITS:       u32;
    const ALTERNATIVE_BITS: u32 = 1;
    const OFFSET_BITS:      u32;

    fn to_word(raw: u64) -> Self::Word;
    fn from_word(word: Self::Word) -> u64;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Index32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Index64;

impl IndexFormat for Index32 {
    type Word = u32;
    const VALUE_BITS:  u32 = 4;
    const OFFSET_BITS: u32 = 27;

    fn to_word(raw: u64) -> u32 { raw as u32 }
    fn from_word(word: u32) -> u64 { word as u64 }
}

impl IndexFormat for Index64 {
    type Word = u64;
    const VALUE_BITS:  u32 = 10;
    const OFFSET_BITS: u32 = 53;

    fn to_word(raw: u64) -> u64 { raw }
    fn from_word(word: u64) -> u64 { word }
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MultiValueIndex<F: IndexFormat> {
    raw: u64,
    _f:  PhantomData<F>,
}

impl<F: IndexFormat> MultiValueIndex<F> {
    const ALT_SHIFT:   u32 = F::OFFSET_BITS;
    const VALUE_SHIFT: u32 = F::OFFSET_BITS + F::ALTERNATIVE_BITS;

    pub fn new(values: usize, alternative: u32, offset: usize) -> Self {
        assert!(values <= Self::max_values(), "value count {values} out of range");
        assert!(alternative < Self::alternative_size(), "alternative {alternative} out of range");
        assert!(offset <= Self::max_offset(), "offset {offset} out of range");
        let raw = ((values as u64) << Self::VALUE_SHIFT)
            | ((alternative as u64) << Self::ALT_SHIFT)
            | offset as u64;
        Self { raw, _f: PhantomData }
    }

    pub fn empty() -> Self { Self::default() }

    /// LARGE 哨兵值，同时也是 SMALL 桶数上界（不含）
    pub fn max_values() -> usize { (1usize << F::VALUE_BITS) - 1 }
    pub fn alternative_size() -> u32 { 1 << F::ALTERNATIVE_BITS }
    pub fn max_offset() -> usize { ((1u64 << F::OFFSET_BITS) - 1) as usize }
    pub fn offset_size() -> usize { Self::max_offset() + 1 }

    pub fn values(self) -> usize { (self.raw >> Self::VALUE_SHIFT) as usize }
    pub fn alternative(self) -> u32 {
        ((self.raw >> Self::ALT_SHIFT) & ((1 << F::ALTERNATIVE_BITS) - 1)) as u32
    }
    pub fn offset(self) -> usize { (self.raw & ((1u64 << F::OFFSET_BITS) - 1)) as usize }

    pub fn is_empty(self) -> bool { self.values() == 0 }
    pub fn is_large(self) -> bool { self.values() == Self::max_values() }

    /// 桶号：`(values << ALTERNATIVE_BITS) + alternative`
    pub fn vector_idx(self) -> usize {
        (self.values() << F::ALTERNATIVE_BITS) + self.alternative() as usize
    }

    pub fn word(self) -> F::Word { F::to_word(self.raw) }
    pub fn from_word(word: F::Word) -> Self { Self { raw: F::from_word(word), _f: PhantomData } }
}

impl<F: IndexFormat> Debug for MultiValueIndex<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MultiValueIndex(n={}, alt={}, off={})", self.values(), self.alternative(), self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index32_layout() {
        type I = MultiValueIndex<Index32>;
        assert_eq!(I::max_values(), 15);
        assert_eq!(I::max_offset(), (1 << 27) - 1);

        let i = I::new(3, 1, 12345);
        assert_eq!((i.values(), i.alternative(), i.offset()), (3, 1, 12345));
        assert_eq!(i.vector_idx(), 7);
        assert_eq!(i.word(), (3 << 28) | (1 << 27) | 12345);
        assert_eq!(I::from_word(i.word()), i);
        assert!(I::new(15, 0, 0).is_large());
        assert!(I::empty().is_empty());
    }

    #[test]
    fn index64_layout() {
        type I = MultiValueIndex<Index64>;
        assert_eq!(I::max_values(), 1023);
        let i = I::new(1022, 1, I::max_offset());
        assert_eq!((i.values(), i.alternative(), i.offset()), (1022, 1, (1 << 53) - 1));
        assert!(!i.is_large());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn offset_overflow_panics() {
        MultiValueIndex::<Index32>::new(1, 0, 1 << 27);
    }
}
