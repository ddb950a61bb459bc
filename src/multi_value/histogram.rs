//! 容量需求直方图：值个数 → 即将写入的文档数

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityHistogram {
    counts: BTreeMap<usize, usize>,
}

impl CapacityHistogram {
    pub fn new() -> Self { Self::default() }

    /// 登记一个即将写入 `values` 个值的文档
    pub fn add(&mut self, values: usize) { self.add_docs(values, 1); }

    pub fn add_docs(&mut self, values: usize, docs: usize) {
        if values > 0 && docs > 0 {
            *self.counts.entry(values).or_insert(0) += docs;
        }
    }

    pub fn get(&self, values: usize) -> usize { self.counts.get(&values).copied().unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.counts.is_empty() }

    /// 按值个数升序遍历 (values, docs)
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.counts.iter().map(|(&v, &d)| (v, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_skips_empty_docs() {
        let mut h = CapacityHistogram::new();
        h.add(2);
        h.add(2);
        h.add(0);
        h.add_docs(40, 3);
        assert_eq!(h.get(2), 2);
        assert_eq!(h.get(0), 0);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![(2, 2), (40, 3)]);
    }
}
