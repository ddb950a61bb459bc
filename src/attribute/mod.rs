//! Attribute：一个字段的完整存储，驱动 commit 周期
//!
//! ```text
//!   commit():
//!     free_unused_enums ─► compaction（按策略）─► freeze_dictionary
//!       ─► transfer_hold_lists(当前纪元) ─► inc_generation ─► trim_hold_lists(first_used)
//! ```
//!
//! 写入只在 `&mut self` 上进行；读端通过 `reader()` 获得可跨线程克隆的句柄，
//! 每次读取都在一个纪元 guard 之内完成。

pub mod enumerated;
pub mod numeric;

use std::fmt;

use crate::common::{AddressSpace, DocId};
use crate::config::CollectionType;

pub use enumerated::{EnumAttribute, EnumAttributeReader};
pub use numeric::{
    Float32Attribute, Float64Attribute, Int16Attribute, Int32Attribute, Int64Attribute,
    Int8Attribute, NumericAttribute, NumericAttributeReader,
};

/// 一个 Attribute 内各组件的地址空间占用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressSpaceUsage {
    /// 数值 Attribute 没有 Enum Store，为 None
    pub enum_store:  Option<AddressSpace>,
    pub multi_value: AddressSpace,
}

impl AddressSpaceUsage {
    /// 占用比例最高的组件
    pub fn worst(&self) -> AddressSpace {
        match self.enum_store {
            Some(e) if e.usage() > self.multi_value.usage() => e,
            _ => self.multi_value,
        }
    }
}

impl fmt::Display for AddressSpaceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.enum_store {
            Some(e) => write!(f, "enum_store={e}, multi_value={}", self.multi_value),
            None    => write!(f, "multi_value={}", self.multi_value),
        }
    }
}

/// 单值 Attribute 每个文档至多一个值
fn check_collection(collection: CollectionType, doc: DocId, values: usize) {
    if collection == CollectionType::Single {
        assert!(values <= 1, "doc {doc}: single-value attribute got {values} values");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_fuller_component() {
        let u = AddressSpaceUsage {
            enum_store:  Some(AddressSpace::new(90, 0, 100)),
            multi_value: AddressSpace::new(10, 0, 100),
        };
        assert_eq!(u.worst(), AddressSpace::new(90, 0, 100));
        let n = AddressSpaceUsage { enum_store: None, multi_value: AddressSpace::new(1, 0, 2) };
        assert_eq!(n.worst().used, 1);
        assert_eq!(n.to_string(), "multi_value={used=1, dead=0, limit=2}");
    }

    #[test]
    #[should_panic(expected = "single-value attribute")]
    fn single_rejects_many() {
        check_collection(CollectionType::Single, 3, 2);
    }

    // ── 跨组件场景 ────────────────────────────────────────────────────────────

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::config::{AttributeConfig, CompactionStrategy, EnumStoreConfig, GrowStrategy};

    fn tight_config() -> AttributeConfig {
        let grow = GrowStrategy::default().initial_capacity(8).alignment(1);
        AttributeConfig::array()
            .enum_store(EnumStoreConfig::default().grow(grow))
            .compaction(CompactionStrategy::default().min_dead(1).max_dead_ratio(0.05))
    }

    #[test]
    fn random_edits_match_model() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut attr: EnumAttribute<i64> = EnumAttribute::new("r", tight_config());
        let mut model: Vec<Vec<i64>> = Vec::new();
        for _ in 0..40 {
            attr.add_doc();
            model.push(Vec::new());
        }

        for round in 0..30 {
            for _ in 0..25 {
                let doc = rng.gen_range(0..model.len());
                let n = match rng.gen_range(0..10) {
                    0 => 0,
                    1 => rng.gen_range(15..40),
                    _ => rng.gen_range(1..6),
                };
                let values: Vec<i64> = (0..n).map(|_| rng.gen_range(0..60)).collect();
                attr.set_raw_values(doc as DocId, &values);
                model[doc] = values;
            }
            attr.commit();

            let mut expected: HashMap<i64, u32> = HashMap::new();
            for (doc, values) in model.iter().enumerate() {
                assert_eq!(attr.get_raw_values(doc as DocId), *values, "round {round} doc {doc}");
                for &v in values {
                    *expected.entry(v).or_default() += 1;
                }
            }
            assert_eq!(attr.enum_store().num_unique(), expected.len());
            for (v, count) in &expected {
                let idx = attr.find_enum(v).unwrap();
                assert_eq!(attr.enum_store().ref_count(idx), *count);
            }
            let usage = attr.address_space_usage();
            for space in [usage.enum_store.unwrap(), usage.multi_value] {
                assert!(space.used >= space.dead, "{space}");
            }
            assert_eq!(attr.memory_usage().on_hold, 0);
        }
    }

    /// 文档 d 的第 k 个版本是 k % 7 个相同的值 "d:k"
    fn version(doc: DocId, k: u32) -> Vec<String> {
        vec![format!("{doc}:{k}"); (k % 7) as usize]
    }

    fn check_version(doc: DocId, values: &[String]) {
        let Some(first) = values.first() else { return };
        let k: u32 = first.split(':').nth(1).and_then(|s| s.parse().ok()).unwrap();
        assert_eq!(values, version(doc, k).as_slice(), "doc {doc} torn read");
    }

    #[test]
    fn readers_never_observe_torn_documents() {
        const DOCS: u32 = 16;
        let mut attr: EnumAttribute<String> = EnumAttribute::new("c", tight_config());
        for d in 0..DOCS {
            attr.add_doc();
            attr.set_raw_values(d, &version(d, 1));
        }
        attr.commit();

        let done = AtomicBool::new(false);
        let reader = attr.reader();
        std::thread::scope(|s| {
            for t in 0..3u64 {
                let reader = reader.clone();
                let done = &done;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t);
                    while !done.load(Ordering::Acquire) {
                        let _guard = reader.guard();
                        let doc = rng.gen_range(0..DOCS);
                        let values: Vec<String> = reader
                            .get_values(doc)
                            .iter()
                            .map(|i| (*reader.resolve(i)).clone())
                            .collect();
                        check_version(doc, &values);
                    }
                });
            }

            let mut rng = StdRng::seed_from_u64(99);
            for k in 2..400 {
                let doc = rng.gen_range(0..DOCS);
                attr.set_raw_values(doc, &version(doc, k));
                if k % 5 == 0 {
                    attr.commit();
                }
            }
            done.store(true, Ordering::Release);
        });
        attr.commit();
        for d in 0..DOCS {
            check_version(d, &attr.get_raw_values(d));
        }
    }

    #[test]
    fn held_guard_keeps_compacted_buffers_alive() {
        let mut attr: EnumAttribute<String> = EnumAttribute::new("h", tight_config());
        for d in 0..12 {
            attr.add_doc();
            attr.set_raw_values(d, &[format!("old{d}"), "keep".to_string()]);
        }
        attr.commit();

        let reader = attr.reader();
        let guard  = reader.guard();
        let slice  = reader.get_values(3);
        let held: Vec<_> = slice.iter().collect();

        for d in 0..12 {
            attr.set_raw_values(d, &["keep".to_string()]);
        }
        attr.commit();
        attr.commit();
        assert!(attr.memory_usage().on_hold > 0);
        assert_eq!(*reader.resolve(held[0]), "old3".to_string());
        assert_eq!(slice.len(), 2);

        drop(guard);
        attr.commit();
        assert_eq!(attr.memory_usage().on_hold, 0);
        assert_eq!(reader.get_raw_values(3), vec!["keep".to_string()]);
    }
}
