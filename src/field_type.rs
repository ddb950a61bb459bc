//! 字段值类型
//!
//! - [`BasicType`]  ：字段的逻辑类型，同时作为序列化文件中的类型标签
//! - [`AtomicValue`]：可放进共享 buffer 的定长值，读写经原子单元完成，
//!   读线程无需加锁即可与唯一的写线程并发访问
//! - [`EnumValue`]  ：可被 Enum Store 去重的值：全序比较 + 二进制编解码

use std::cmp::Ordering;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU32, AtomicU64, Ordering as MemOrder,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// 字段的逻辑类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    String,
}

impl BasicType {
    /// 固定字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Int8                  => Some(1),
            Self::Int16                 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::String                => None,
        }
    }

    pub fn is_numeric(self) -> bool { self != Self::String }

    pub fn tag(self) -> u8 {
        match self {
            Self::Int8    => 1,
            Self::Int16   => 2,
            Self::Int32   => 3,
            Self::Int64   => 4,
            Self::Float32 => 5,
            Self::Float64 => 6,
            Self::String  => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Float32,
            6 => Self::Float64,
            7 => Self::String,
            _ => return None,
        })
    }
}

// ── AtomicValue ───────────────────────────────────────────────────────────────

/// 存放在共享 buffer 中的定长值
///
/// 每个值对应一个原子单元 `Cell`。元素本身用 Relaxed 读写即可，
/// 可见性由发布文档索引时的 Release / Acquire 保证。
pub trait AtomicValue: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    type Cell: Send + Sync;

    fn new_cell(v: Self) -> Self::Cell;
    fn load(cell: &Self::Cell, order: MemOrder) -> Self;
    fn store(cell: &Self::Cell, v: Self, order: MemOrder);
}

macro_rules! impl_atomic_int {
    ($($t:ty => $cell:ty),* $(,)?) => {$(
        impl AtomicValue for $t {
            type Cell = $cell;

            #[inline]
            fn new_cell(v: Self) -> Self::Cell { <$cell>::new(v) }
            #[inline]
            fn load(cell: &Self::Cell, order: MemOrder) -> Self { cell.load(order) }
            #[inline]
            fn store(cell: &Self::Cell, v: Self, order: MemOrder) { cell.store(v, order) }
        }
    )*};
}

impl_atomic_int! {
    i8  => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    u32 => AtomicU32,
    u64 => AtomicU64,
}

macro_rules! impl_atomic_float {
    ($($t:ty => $cell:ty),* $(,)?) => {$(
        impl AtomicValue for $t {
            type Cell = $cell;

            #[inline]
            fn new_cell(v: Self) -> Self::Cell { <$cell>::new(v.to_bits()) }
            #[inline]
            fn load(cell: &Self::Cell, order: MemOrder) -> Self { <$t>::from_bits(cell.load(order)) }
            #[inline]
            fn store(cell: &Self::Cell, v: Self, order: MemOrder) { cell.store(v.to_bits(), order) }
        }
    )*};
}

impl_atomic_float! {
    f32 => AtomicU32,
    f64 => AtomicU64,
}

/// 不做去重、直接存入多值映射的数值类型
pub trait NumericValue: AtomicValue {
    const BASIC_TYPE: BasicType;
}

macro_rules! impl_numeric {
    ($($t:ty => $bt:ident),* $(,)?) => {$(
        impl NumericValue for $t {
            const BASIC_TYPE: BasicType = BasicType::$bt;
        }
    )*};
}

impl_numeric! {
    i8  => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
}

// ── EnumValue ─────────────────────────────────────────────────────────────────

/// 可去重（intern）的值
pub trait EnumValue: Clone + Debug + Send + Sync + 'static {
    const BASIC_TYPE: BasicType;

    /// 全序比较，决定字典中的排列顺序
    fn compare(&self, other: &Self) -> Ordering;

    /// 折叠比较：相等的一组值共享同一个 posting list。
    /// `compare` 必须是它的细化（折叠相等的值在字典中相邻）。
    fn fold_compare(&self, other: &Self) -> Ordering { self.compare(other) }

    /// 值在堆上额外占用的字节
    fn heap_bytes(&self) -> usize { 0 }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self>;
}

macro_rules! impl_enum_int {
    ($($t:ty, $bt:ident, $w:ident, $r:ident);* $(;)?) => {$(
        impl EnumValue for $t {
            const BASIC_TYPE: BasicType = BasicType::$bt;

            fn compare(&self, other: &Self) -> Ordering { self.cmp(other) }
            fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                w.$w::<LittleEndian>(*self)
            }
            fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                r.$r::<LittleEndian>()
            }
        }
    )*};
}

impl_enum_int! {
    i16, Int16, write_i16, read_i16;
    i32, Int32, write_i32, read_i32;
    i64, Int64, write_i64, read_i64;
}

impl EnumValue for i8 {
    const BASIC_TYPE: BasicType = BasicType::Int8;

    fn compare(&self, other: &Self) -> Ordering { self.cmp(other) }
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> { w.write_i8(*self) }
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> { r.read_i8() }
}

macro_rules! impl_enum_float {
    ($($t:ty, $bt:ident, $w:ident, $r:ident);* $(;)?) => {$(
        impl EnumValue for $t {
            const BASIC_TYPE: BasicType = BasicType::$bt;

            // NaN 也参与全序，保证字典里每个位模式只有一个条目
            fn compare(&self, other: &Self) -> Ordering { self.total_cmp(other) }
            fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                w.$w::<LittleEndian>(*self)
            }
            fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                r.$r::<LittleEndian>()
            }
        }
    )*};
}

impl_enum_float! {
    f32, Float32, write_f32, read_f32;
    f64, Float64, write_f64, read_f64;
}

/// 字符串先按大小写折叠比较，再按原始字节区分
impl EnumValue for String {
    const BASIC_TYPE: BasicType = BasicType::String;

    fn compare(&self, other: &Self) -> Ordering {
        self.fold_compare(other).then_with(|| self.as_bytes().cmp(other.as_bytes()))
    }

    fn fold_compare(&self, other: &Self) -> Ordering {
        let a = self.chars().flat_map(char::to_lowercase);
        let b = other.chars().flat_map(char::to_lowercase);
        a.cmp(b)
    }

    fn heap_bytes(&self) -> usize { self.capacity() }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than u32::MAX"))?;
        w.write_u32::<LittleEndian>(len)?;
        w.write_all(self.as_bytes())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let len = r.read_u32::<LittleEndian>()? as u64;
        // 按声明长度读取，不预先分配，截断的输入不会触发巨量分配
        let mut buf = Vec::new();
        r.take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated string value"));
        }
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
