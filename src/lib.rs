//! # attribute-store
//!
//! 内存列式 Attribute 存储：每个字段按文档保存 0..N 个值，
//! 读线程无锁并发读取，写线程单线程修改，内存按纪元（generation）回收。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      EnumAttribute<T>                         │
//! │   ┌──────────────────────┐     ┌───────────────────────────┐  │
//! │   │      EnumStore       │     │   MultiValueMapping<EIdx> │  │
//! │   │  BufferArena<Record> │◄────│   RcuVector<MVIndex>      │  │
//! │   │  Dictionary (有序)    │     │   small buckets 1..N      │  │
//! │   │  ref_count / ordinal │     │   large vectors           │  │
//! │   └──────────┬───────────┘     └─────────────┬─────────────┘  │
//! │              └──────────┬────────────────────┘                │
//! │                  GenerationHandler                             │
//! │         hold list ─► transfer ─► trim(first_used)              │
//! └──────────────────────────────────────────────────────────────┘
//!
//!   NumericAttribute<T>：值直接存入 MultiValueMapping<T>
//!   serialization：枚举值文件（MAGIC + header + LZ4 payload + CRC32）
//! ```

// ── 基础设施 ──────────────────────────────────────────────────────────────────
pub mod common;
pub mod config;
pub mod field_type;
pub mod generation;
pub mod arena;
pub mod rcu_vector;
pub mod compression;

// ── 存储组件 ──────────────────────────────────────────────────────────────────
pub mod enum_store;
pub mod multi_value;

// ── Attribute 与持久化 ────────────────────────────────────────────────────────
pub mod attribute;
pub mod serialization;

pub use attribute::{
    AddressSpaceUsage, EnumAttribute, EnumAttributeReader, Float32Attribute, Float64Attribute,
    Int16Attribute, Int32Attribute, Int64Attribute, Int8Attribute, NumericAttribute,
    NumericAttributeReader,
};
pub use common::{AddressSpace, AttrError, DocId, Generation, MemoryUsage, Result};
pub use compression::CompressionType;
pub use config::{
    AttributeConfig, CollectionType, CompactionStrategy, EnumStoreConfig, GrowStrategy,
    MultiValueConfig,
};
pub use enum_store::{EnumIndex, EnumStore, EnumStoreReader, EnumValueRef, PostingRef};
pub use field_type::{BasicType, EnumValue, NumericValue};
pub use generation::{GenerationGuard, GenerationHandler};
pub use multi_value::{Index32, Index64, MultiValueIndex, MultiValueMapping, ValueSlice};
pub use serialization::{write_enum_values, EnumStreamReader};
