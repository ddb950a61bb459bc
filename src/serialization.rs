//! 枚举值文件：去重 Attribute 的持久化格式
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │ MAGIC         (8 bytes) "ATTRENUM"        │
//! │ version       (u32 LE)                    │
//! │ basic_type    (u8)                        │
//! │ compression   (u8)                        │
//! │ doc_count     (u32 LE)                    │
//! │ unique_count  (u32 LE)                    │
//! │ total_values  (u64 LE)                    │
//! │ payload_len   (u32 LE)  压缩后长度        │
//! │ raw_len       (u32 LE)  压缩前长度        │
//! ├───────────────────────────────────────────┤
//! │ payload（压缩前）:                        │
//! │   unique values       字典序              │
//! │   offsets[doc+1]      u32 LE 累计偏移     │
//! │   ordinals[total]     u32 LE 字典序号     │
//! ├───────────────────────────────────────────┤
//! │ CRC32 (header + payload)  (u32 LE)        │
//! └───────────────────────────────────────────┘
//! ```

use std::cmp::Ordering;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::arena::try_grow_size;
use crate::attribute::EnumAttribute;
use crate::common::{AttrError, DocId, Result};
use crate::compression::{self, CompressionType};
use crate::config::{AttributeConfig, CollectionType};
use crate::enum_store::{index::MAX_OFFSET, EnumIndex};
use crate::field_type::{BasicType, EnumValue};
use crate::multi_value::IndexFormat;

const MAGIC: &[u8; 8] = b"ATTRENUM";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 1 + 1 + 4 + 4 + 8 + 4 + 4;

fn corrupt(msg: impl Into<String>) -> AttrError { AttrError::Corrupt(msg.into()) }

fn to_u32(n: usize, what: &str) -> Result<u32> {
    u32::try_from(n).map_err(|_| corrupt(format!("{what} {n} does not fit in u32")))
}

// ── 写入 ──────────────────────────────────────────────────────────────────────

/// 序列化整个 Attribute，返回写入的字节数
pub fn write_enum_values<T, F, W>(
    attr:        &EnumAttribute<T, F>,
    mut writer:  W,
    compression: CompressionType,
) -> Result<u64>
where
    T: EnumValue,
    F: IndexFormat,
    W: Write,
{
    let store = attr.enum_store();
    let mut ordinals: FxHashMap<EnumIndex, u32> = FxHashMap::default();
    let mut raw = Vec::new();
    for (i, idx) in store.iter_sorted().enumerate() {
        store.value(idx).write_to(&mut raw)?;
        ordinals.insert(idx, i as u32);
    }

    let num_docs = attr.num_docs();
    let mut doc_ordinals = Vec::new();
    raw.write_u32::<LittleEndian>(0)?;
    for doc in 0..num_docs as DocId {
        for idx in attr.get_values(doc).iter() {
            let ord = ordinals
                .get(&idx)
                .copied()
                .ok_or_else(|| corrupt(format!("doc {doc} references {idx:?} missing from dictionary")))?;
            doc_ordinals.push(ord);
        }
        raw.write_u32::<LittleEndian>(to_u32(doc_ordinals.len(), "value count")?)?;
    }
    for &ord in &doc_ordinals {
        raw.write_u32::<LittleEndian>(ord)?;
    }

    let payload = compression::compress(&raw, compression)?;

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.write_all(MAGIC)?;
    header.write_u32::<LittleEndian>(VERSION)?;
    header.write_u8(T::BASIC_TYPE.tag())?;
    header.write_u8(compression.tag())?;
    header.write_u32::<LittleEndian>(to_u32(num_docs, "doc count")?)?;
    header.write_u32::<LittleEndian>(to_u32(ordinals.len(), "unique count")?)?;
    header.write_u64::<LittleEndian>(doc_ordinals.len() as u64)?;
    header.write_u32::<LittleEndian>(to_u32(payload.len(), "payload length")?)?;
    header.write_u32::<LittleEndian>(to_u32(raw.len(), "raw length")?)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(&payload);
    let crc = hasher.finalize();

    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    writer.write_u32::<LittleEndian>(crc)?;
    Ok((header.len() + payload.len() + 4) as u64)
}

// ── 读取 ──────────────────────────────────────────────────────────────────────

/// 完整校验后的暂存数据
struct Staged<T> {
    values:   Vec<T>,
    offsets:  Vec<u32>,
    ordinals: Vec<u32>,
}

/// 流式反序列化。任何错误都会把流退回到本次读取前的位置，
/// 且在校验全部通过前不构建任何结构。
pub struct EnumStreamReader<R> {
    inner: R,
}

impl<R: Read + Seek> EnumStreamReader<R> {
    pub fn new(inner: R) -> Self { Self { inner } }

    pub fn into_inner(self) -> R { self.inner }

    pub fn read_attribute<T: EnumValue, F: IndexFormat>(
        &mut self,
        name:   impl Into<String>,
        config: AttributeConfig,
    ) -> Result<EnumAttribute<T, F>> {
        let name  = name.into();
        let start = self.inner.stream_position()?;
        match self.parse::<T>(&config) {
            Ok(staged) => {
                debug!(
                    attribute = %name,
                    docs   = staged.offsets.len() - 1,
                    unique = staged.values.len(),
                    "loaded enumerated attribute",
                );
                Ok(EnumAttribute::from_sorted(name, config, staged.values, &staged.offsets, &staged.ordinals))
            }
            Err(e) => {
                warn!(attribute = %name, position = start, error = %e, "enum stream rejected, rolling back");
                self.inner.seek(SeekFrom::Start(start))?;
                Err(e)
            }
        }
    }

    fn parse<T: EnumValue>(&mut self, config: &AttributeConfig) -> Result<Staged<T>> {
        let mut header = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut header)?;
        let mut c = Cursor::new(&header[..]);

        let mut magic = [0u8; 8];
        c.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(AttrError::InvalidMagic);
        }
        let version = c.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(AttrError::UnsupportedVersion(version));
        }
        let type_tag = c.read_u8()?;
        let found = BasicType::from_tag(type_tag)
            .ok_or_else(|| corrupt(format!("unknown basic type tag {type_tag}")))?;
        if found != T::BASIC_TYPE {
            return Err(AttrError::TypeMismatch { expected: T::BASIC_TYPE, found });
        }
        let codec_tag = c.read_u8()?;
        let codec = CompressionType::from_tag(codec_tag)
            .ok_or_else(|| corrupt(format!("unknown compression tag {codec_tag}")))?;
        let doc_count    = c.read_u32::<LittleEndian>()? as usize;
        let unique_count = c.read_u32::<LittleEndian>()? as usize;
        let total_values = c.read_u64::<LittleEndian>()?;
        let payload_len  = c.read_u32::<LittleEndian>()? as usize;
        let raw_len      = c.read_u32::<LittleEndian>()? as usize;

        // 按声明长度读取，截断的输入不会触发大块预分配
        let mut payload = Vec::new();
        (&mut self.inner).take(payload_len as u64).read_to_end(&mut payload)?;
        if payload.len() != payload_len {
            return Err(corrupt(format!("payload truncated: expected {payload_len} bytes, got {}", payload.len())));
        }
        let stored_crc = self.inner.read_u32::<LittleEndian>()?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(AttrError::ChecksumMismatch);
        }

        let max_raw = match codec {
            CompressionType::None => payload_len,
            CompressionType::Lz4  => compression::max_inflated_len(payload_len),
        };
        if raw_len > max_raw {
            return Err(corrupt(format!("{payload_len} payload bytes cannot expand to {raw_len}")));
        }
        let raw = compression::decompress(&payload, codec, raw_len)?;
        if raw.len() != raw_len {
            return Err(corrupt(format!("payload inflates to {} bytes, header says {raw_len}", raw.len())));
        }
        // 与 EnumStore 首次分配走同一套尺寸计算，装不下的流在构建前拒绝
        if try_grow_size(0, 0, unique_count, MAX_OFFSET, &config.enum_store.grow).is_none() {
            return Err(corrupt(format!(
                "{unique_count} unique values exceed enum store capacity {MAX_OFFSET} (grow_delta {})",
                config.enum_store.grow.grow_delta,
            )));
        }
        let mut c = Cursor::new(&raw[..]);

        let mut values: Vec<T> = Vec::with_capacity(unique_count.min(raw_len));
        for i in 0..unique_count {
            let v = T::read_from(&mut c).map_err(|e| corrupt(format!("unique value {i}: {e}")))?;
            if let Some(prev) = values.last() {
                if prev.compare(&v) != Ordering::Less {
                    return Err(corrupt(format!("unique values not strictly increasing at {i}")));
                }
            }
            values.push(v);
        }

        let mut offsets = Vec::with_capacity((doc_count + 1).min(raw_len / 4 + 1));
        for doc in 0..=doc_count {
            let off = c.read_u32::<LittleEndian>()
                .map_err(|e| corrupt(format!("index vector entry {doc}: {e}")))?;
            let prev = offsets.last().copied().unwrap_or(0);
            if off < prev || (doc == 0 && off != 0) {
                return Err(corrupt(format!("index vector not monotonic at doc {doc}")));
            }
            if doc > 0 && config.collection == CollectionType::Single && off - prev > 1 {
                return Err(corrupt(format!("doc {} has {} values in a single-value attribute", doc - 1, off - prev)));
            }
            offsets.push(off);
        }
        let last = offsets.last().copied().unwrap_or(0) as u64;
        if last != total_values {
            return Err(corrupt(format!("index vector ends at {last}, header says {total_values} values")));
        }

        let total = usize::try_from(total_values)
            .map_err(|_| corrupt(format!("{total_values} values do not fit in memory")))?;
        let mut ordinals = Vec::with_capacity(total.min(raw_len / 4));
        for i in 0..total {
            let ord = c.read_u32::<LittleEndian>()
                .map_err(|e| corrupt(format!("ordinal {i}: {e}")))?;
            if ord as usize >= unique_count {
                return Err(corrupt(format!("ordinal {i} = {ord} out of range ({unique_count} unique values)")));
            }
            ordinals.push(ord);
        }
        if (c.position() as usize) != raw.len() {
            return Err(corrupt(format!("{} trailing bytes in payload", raw.len() - c.position() as usize)));
        }
        Ok(Staged { values, offsets, ordinals })
    }
}

impl<T: EnumValue, F: IndexFormat> EnumAttribute<T, F> {
    pub fn save<W: Write>(&self, writer: W, compression: CompressionType) -> Result<u64> {
        write_enum_values(self, writer, compression)
    }

    pub fn load<R: Read + Seek>(
        reader: &mut R,
        name:   impl Into<String>,
        config: AttributeConfig,
    ) -> Result<Self> {
        EnumStreamReader::new(reader).read_attribute(name, config)
    }
}
