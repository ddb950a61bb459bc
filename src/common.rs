//! 全局基础类型、容量统计与错误定义

use thiserror::Error;

use crate::field_type::BasicType;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 文档 id：由所属 Attribute 分配的稠密整数，驻留期间不复用
pub type DocId      = u32;
/// 写入纪元（单调递增）
pub type Generation = u64;
/// Buffer Arena 内的 buffer 编号
pub type BufferId   = u32;

// ── Address Space ─────────────────────────────────────────────────────────────

/// 一个 arena 的地址空间占用，单位为该 arena 的原生记录
///
/// 不变式：`used >= dead` 且 `used - dead <= limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressSpace {
    pub used:  usize,
    pub dead:  usize,
    pub limit: usize,
}

impl AddressSpace {
    pub fn new(used: usize, dead: usize, limit: usize) -> Self {
        debug_assert!(used >= dead, "address space: used {used} < dead {dead}");
        Self { used, dead, limit }
    }

    pub fn live(&self) -> usize { self.used - self.dead }

    /// 活跃记录占上限的比例
    pub fn usage(&self) -> f64 {
        if self.limit == 0 { return 0.0; }
        self.live() as f64 / self.limit as f64
    }
}

impl std::fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{used={}, dead={}, limit={}}}", self.used, self.dead, self.limit)
    }
}

// ── Memory Usage ──────────────────────────────────────────────────────────────

/// 字节级内存统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    /// 已向系统申请的字节
    pub allocated: usize,
    /// 已分配给记录的字节
    pub used:      usize,
    /// 逻辑删除、等待 compaction 的字节
    pub dead:      usize,
    /// 挂在 hold list 上、等待纪元退休的字节
    pub on_hold:   usize,
}

impl MemoryUsage {
    pub fn merge(&mut self, other: MemoryUsage) {
        self.allocated += other.allocated;
        self.used      += other.used;
        self.dead      += other.dead;
        self.on_hold   += other.on_hold;
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

/// 可恢复错误。容量越界与调用方契约违例直接 panic，不走这里。
#[derive(Debug, Error)]
pub enum AttrError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid magic")]
    InvalidMagic,
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: BasicType, found: BasicType },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("corrupt enum stream: {0}")]
    Corrupt(String),
    #[error("compression error: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, AttrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_space_live_and_usage() {
        let a = AddressSpace::new(100, 40, 120);
        assert_eq!(a.live(), 60);
        assert!((a.usage() - 0.5).abs() < 1e-9);
        assert_eq!(a.to_string(), "{used=100, dead=40, limit=120}");
    }

    #[test]
    fn memory_usage_merge_sums_fields() {
        let mut m = MemoryUsage { allocated: 10, used: 5, dead: 1, on_hold: 2 };
        m.merge(MemoryUsage { allocated: 1, used: 1, dead: 1, on_hold: 1 });
        assert_eq!(m, MemoryUsage { allocated: 11, used: 6, dead: 2, on_hold: 3 });
    }
}
