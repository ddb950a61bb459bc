//! 数值 Attribute：值直接存入多值映射，不经过 Enum Store

use crate::attribute::{check_collection, AddressSpaceUsage};
use crate::common::{DocId, Generation, MemoryUsage};
use crate::config::AttributeConfig;
use crate::field_type::{BasicType, NumericValue};
use crate::generation::{GenerationGuard, GenerationHandler, GenerationReader};
use crate::multi_value::{Index32, IndexFormat, MultiValueMapping, MultiValueReader, ValueSlice};

pub type Int8Attribute    = NumericAttribute<i8>;
pub type Int16Attribute   = NumericAttribute<i16>;
pub type Int32Attribute   = NumericAttribute<i32>;
pub type Int64Attribute   = NumericAttribute<i64>;
pub type Float32Attribute = NumericAttribute<f32>;
pub type Float64Attribute = NumericAttribute<f64>;

pub struct NumericAttribute<T: NumericValue, F: IndexFormat = Index32> {
    name:       String,
    config:     AttributeConfig,
    mapping:    MultiValueMapping<T, F>,
    generation: GenerationHandler,
}

impl<T: NumericValue, F: IndexFormat> NumericAttribute<T, F> {
    pub fn new(name: impl Into<String>, config: AttributeConfig) -> Self {
        Self {
            name:       name.into(),
            mapping:    MultiValueMapping::new(&config.multi_value),
            generation: GenerationHandler::new(),
            config,
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn basic_type(&self) -> BasicType { T::BASIC_TYPE }
    pub fn num_docs(&self) -> usize { self.mapping.num_docs() }
    pub fn current_generation(&self) -> Generation { self.generation.current_generation() }

    pub fn add_doc(&mut self) -> DocId { self.mapping.add_doc() }

    pub fn set_values(&mut self, doc: DocId, values: &[T]) {
        check_collection(self.config.collection, doc, values.len());
        self.mapping.set(doc, values);
    }

    pub fn clear_doc(&mut self, doc: DocId) { self.mapping.set(doc, &[]); }

    pub fn get_values(&self, doc: DocId) -> ValueSlice<T> { self.mapping.get(doc) }

    pub fn value_count(&self, doc: DocId) -> usize { self.mapping.value_count(doc) }

    pub fn commit(&mut self) {
        self.mapping.compact_worst(&self.config.compaction);
        let current = self.generation.current_generation();
        self.mapping.transfer_hold_lists(current);
        self.generation.inc_generation();
        let first_used = self.generation.update_first_used_generation();
        self.mapping.trim_hold_lists(first_used);
    }

    pub fn address_space_usage(&self) -> AddressSpaceUsage {
        AddressSpaceUsage { enum_store: None, multi_value: self.mapping.address_space() }
    }

    pub fn memory_usage(&self) -> MemoryUsage { self.mapping.memory_usage() }

    pub fn reader(&self) -> NumericAttributeReader<T, F> {
        NumericAttributeReader { generation: self.generation.reader(), mapping: self.mapping.reader() }
    }
}

pub struct NumericAttributeReader<T: NumericValue, F: IndexFormat = Index32> {
    generation: GenerationReader,
    mapping:    MultiValueReader<T, F>,
}

impl<T: NumericValue, F: IndexFormat> Clone for NumericAttributeReader<T, F> {
    fn clone(&self) -> Self {
        Self { generation: self.generation.clone(), mapping: self.mapping.clone() }
    }
}

impl<T: NumericValue, F: IndexFormat> NumericAttributeReader<T, F> {
    pub fn guard(&self) -> GenerationGuard { self.generation.take_guard() }
    pub fn num_docs(&self) -> usize { self.mapping.num_docs() }
    pub fn get_values(&self, doc: DocId) -> ValueSlice<T> { self.mapping.get(doc) }
    pub fn value_count(&self, doc: DocId) -> usize { self.mapping.value_count(doc) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionStrategy;
    use crate::multi_value::Index64;

    #[test]
    fn numeric_types_report_basic_type() {
        assert_eq!(Int8Attribute::new("a", AttributeConfig::array()).basic_type(), BasicType::Int8);
        assert_eq!(Float64Attribute::new("b", AttributeConfig::array()).basic_type(), BasicType::Float64);
    }

    #[test]
    fn cardinality_boundary_switches_to_large() {
        let mut a = Int32Attribute::new("n", AttributeConfig::array());
        let d = a.add_doc();
        let small: Vec<i32> = (0..14).collect();
        a.set_values(d, &small);
        assert!(!a.mapping.index(d).is_large());
        assert_eq!(a.get_values(d).to_vec(), small);

        let large: Vec<i32> = (0..15).collect();
        a.set_values(d, &large);
        assert!(a.mapping.index(d).is_large());
        assert_eq!(a.value_count(d), 15);
        assert_eq!(a.get_values(d).to_vec(), large);
    }

    #[test]
    fn wide_index_keeps_hundreds_inline() {
        let mut a: NumericAttribute<f64, Index64> = NumericAttribute::new("w", AttributeConfig::array());
        let d = a.add_doc();
        let values: Vec<f64> = (0..1022).map(|i| i as f64 * 0.5).collect();
        a.set_values(d, &values);
        assert!(!a.mapping.index(d).is_large());
        assert_eq!(a.get_values(d).get(1021), 510.5);
    }

    #[test]
    fn commit_compacts_and_releases() {
        let config = AttributeConfig::array()
            .compaction(CompactionStrategy::default().min_dead(1).max_dead_ratio(0.1));
        let mut a = Int64Attribute::new("n", config);
        for d in 0..8 {
            a.add_doc();
            a.set_values(d, &[d as i64, 1]);
        }
        for d in 0..4 {
            a.clear_doc(d);
        }
        let reader = a.reader();
        let view = reader.get_values(6);
        a.commit();
        assert_eq!(a.address_space_usage().multi_value.dead, 0);
        assert_eq!(view.to_vec(), vec![6, 1]);
        assert_eq!(reader.get_values(6).to_vec(), vec![6, 1]);
        assert_eq!(a.memory_usage().on_hold, 0);
        assert_eq!(a.current_generation(), 1);
    }
}
