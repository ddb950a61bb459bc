//! 运行时配置：增长策略、compaction 策略与各组件的配置聚合

/// Buffer 增长策略（单位：记录数）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowStrategy {
    /// 首个 buffer 的最小容量
    pub initial_capacity: usize,
    /// 按比例增长的百分比，50 即 1.5 倍
    pub grow_percent:     u32,
    /// 比例增长越过上限时改用的固定余量
    pub grow_delta:       usize,
    /// 新容量向上取整的粒度
    pub alignment:        usize,
}

impl Default for GrowStrategy {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            grow_percent:     50,
            grow_delta:       1_000_000,
            alignment:        16,
        }
    }
}

impl GrowStrategy {
    pub fn initial_capacity(mut self, n: usize) -> Self {
        self.initial_capacity = n; self
    }
    pub fn grow_percent(mut self, pct: u32) -> Self {
        self.grow_percent = pct; self
    }
    pub fn grow_delta(mut self, delta: usize) -> Self {
        self.grow_delta = delta; self
    }
    pub fn alignment(mut self, align: usize) -> Self {
        self.alignment = align.max(1); self
    }
}

/// commit 时是否触发 compaction 的判定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionStrategy {
    /// dead / used 超过该比例时 compaction
    pub max_dead_ratio: f64,
    /// dead 记录数低于该值时不 compaction
    pub min_dead:       usize,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self { max_dead_ratio: 0.2, min_dead: 1024 }
    }
}

impl CompactionStrategy {
    pub fn max_dead_ratio(mut self, ratio: f64) -> Self {
        self.max_dead_ratio = ratio; self
    }
    pub fn min_dead(mut self, n: usize) -> Self {
        self.min_dead = n; self
    }

    pub fn should_compact(&self, used: usize, dead: usize) -> bool {
        dead >= self.min_dead && used > 0 && dead as f64 > used as f64 * self.max_dead_ratio
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnumStoreConfig {
    pub grow: GrowStrategy,
}

impl EnumStoreConfig {
    pub fn grow(mut self, grow: GrowStrategy) -> Self {
        self.grow = grow; self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiValueConfig {
    /// 各 SMALL 基数桶的增长策略（单位：文档槽位）
    pub small: GrowStrategy,
    /// LARGE 回退池的增长策略（单位：每文档向量）
    pub large: GrowStrategy,
    /// 文档槽位向量的增长策略
    pub docs:  GrowStrategy,
}

impl Default for MultiValueConfig {
    fn default() -> Self {
        Self {
            small: GrowStrategy::default(),
            large: GrowStrategy::default().initial_capacity(64),
            docs:  GrowStrategy::default(),
        }
    }
}

impl MultiValueConfig {
    pub fn small(mut self, grow: GrowStrategy) -> Self {
        self.small = grow; self
    }
    pub fn large(mut self, grow: GrowStrategy) -> Self {
        self.large = grow; self
    }
    pub fn docs(mut self, grow: GrowStrategy) -> Self {
        self.docs = grow; self
    }
}

/// 每文档单值或多值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    Single,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeConfig {
    pub collection:  CollectionType,
    pub enum_store:  EnumStoreConfig,
    pub multi_value: MultiValueConfig,
    pub compaction:  CompactionStrategy,
}

impl Default for AttributeConfig {
    fn default() -> Self {
        Self {
            collection:  CollectionType::Array,
            enum_store:  EnumStoreConfig::default(),
            multi_value: MultiValueConfig::default(),
            compaction:  CompactionStrategy::default(),
        }
    }
}

impl AttributeConfig {
    pub fn single() -> Self {
        Self { collection: CollectionType::Single, ..Default::default() }
    }
    pub fn array() -> Self { Self::default() }

    pub fn enum_store(mut self, cfg: EnumStoreConfig) -> Self {
        self.enum_store = cfg; self
    }
    pub fn multi_value(mut self, cfg: MultiValueConfig) -> Self {
        self.multi_value = cfg; self
    }
    pub fn compaction(mut self, cfg: CompactionStrategy) -> Self {
        self.compaction = cfg; self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_strategy_thresholds() {
        let s = CompactionStrategy::default().min_dead(10).max_dead_ratio(0.5);
        assert!(!s.should_compact(100, 9));
        assert!(!s.should_compact(100, 50));
        assert!(s.should_compact(100, 51));
        assert!(!s.should_compact(0, 0));
    }

    #[test]
    fn alignment_never_zero() {
        assert_eq!(GrowStrategy::default().alignment(0).alignment, 1);
    }
}
