//! 压缩/解压（LZ4 / None）

use crate::common::{AttrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
}

impl CompressionType {
    pub fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4  => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// LZ4 block 的最大膨胀：每个输入字节至多展开为 255 字节，外加少量尾部
pub fn max_inflated_len(compressed_len: usize) -> usize {
    compressed_len.saturating_mul(255).saturating_add(16)
}

pub fn compress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  =>
            lz4::block::compress(data, None, false)
                .map_err(|e| AttrError::Compression(e.to_string())),
    }
}

pub fn decompress(
    data:             &[u8],
    codec:            CompressionType,
    uncompressed_len: usize,
) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  => {
            if uncompressed_len > max_inflated_len(data.len()) {
                return Err(AttrError::Compression(format!(
                    "{} compressed bytes cannot inflate to {uncompressed_len}", data.len(),
                )));
            }
            let len = i32::try_from(uncompressed_len)
                .map_err(|_| AttrError::Compression(format!("uncompressed size {uncompressed_len} too large")))?;
            lz4::block::decompress(data, Some(len))
                .map_err(|e| AttrError::Compression(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_restores_input() {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| (i % 7).to_le_bytes()).collect();
        let packed = compress(&data, CompressionType::Lz4).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, CompressionType::Lz4, data.len()).unwrap(), data);
    }

    #[test]
    fn garbage_is_a_compression_error() {
        let err = decompress(&[0xff; 16], CompressionType::Lz4, 1024).unwrap_err();
        assert!(matches!(err, AttrError::Compression(_)));
    }

    #[test]
    fn implausible_output_size_is_rejected_up_front() {
        let packed = compress(b"abc", CompressionType::Lz4).unwrap();
        let err = decompress(&packed, CompressionType::Lz4, 1 << 30).unwrap_err();
        assert!(matches!(err, AttrError::Compression(msg) if msg.contains("cannot inflate")));
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(CompressionType::from_tag(CompressionType::Lz4.tag()), Some(CompressionType::Lz4));
        assert_eq!(CompressionType::from_tag(9), None);
    }
}
