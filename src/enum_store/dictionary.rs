//! 有序字典：值 → EnumIndex
//!
//! 两层 B 树式结构：有序的叶子数组，每个叶子最多 [`LEAF_CAPACITY`] 个条目。
//! 字典只保存 EnumIndex，不持有值；所有查找都由调用方提供比较函数
//! （把 key 指向的值与探测值比较）。
//!
//! 叶子以 `Arc` 共享：`clone()` 只复制叶子指针，得到冻结快照供读线程遍历，
//! 写线程之后修改某个叶子时才复制该叶子（copy-on-write）。

use std::cmp::Ordering;
use std::sync::Arc;

use crate::enum_store::index::EnumIndex;

pub const LEAF_CAPACITY: usize = 64;

/// 外部 posting list 句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PostingRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictEntry {
    pub key:     EnumIndex,
    pub posting: Option<PostingRef>,
}

impl DictEntry {
    pub fn new(key: EnumIndex) -> Self { Self { key, posting: None } }
}

#[derive(Debug, Clone, Default)]
struct Leaf {
    entries: Vec<DictEntry>,
}

/// 字典内的位置（叶子号, 叶内槽位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    leaf: usize,
    slot: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    leaves: Vec<Arc<Leaf>>,
    len:    usize,
}

impl Dictionary {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }

    // ── 定位 ──────────────────────────────────────────────────────────────────

    /// 第一个 `cmp(key) != Less` 的位置；`cmp` 返回 key 相对探测值的顺序
    pub fn lower_bound(&self, cmp: impl Fn(EnumIndex) -> Ordering) -> Position {
        let leaf = self.leaves.partition_point(|l| {
            l.entries.last().map(|e| cmp(e.key) == Ordering::Less).unwrap_or(true)
        });
        if leaf == self.leaves.len() {
            return self.end();
        }
        let slot = self.leaves[leaf].entries.partition_point(|e| cmp(e.key) == Ordering::Less);
        Position { leaf, slot }
    }

    fn end(&self) -> Position { Position { leaf: self.leaves.len(), slot: 0 } }

    pub fn entry_at(&self, pos: Position) -> Option<&DictEntry> {
        self.leaves.get(pos.leaf).and_then(|l| l.entries.get(pos.slot))
    }

    pub fn entry_at_mut(&mut self, pos: Position) -> Option<&mut DictEntry> {
        let leaf = self.leaves.get_mut(pos.leaf)?;
        Arc::make_mut(leaf).entries.get_mut(pos.slot)
    }

    pub fn next(&self, pos: Position) -> Position {
        let Some(leaf) = self.leaves.get(pos.leaf) else { return self.end(); };
        if pos.slot + 1 < leaf.entries.len() {
            Position { leaf: pos.leaf, slot: pos.slot + 1 }
        } else {
            Position { leaf: pos.leaf + 1, slot: 0 }
        }
    }

    /// 精确查找
    pub fn find(&self, cmp: impl Fn(EnumIndex) -> Ordering) -> Option<Position> {
        let pos = self.lower_bound(&cmp);
        match self.entry_at(pos) {
            Some(e) if cmp(e.key) == Ordering::Equal => Some(pos),
            _ => None,
        }
    }

    // ── 修改 ──────────────────────────────────────────────────────────────────

    /// 插入到有序位置；已有相等条目时不插入并返回 false
    pub fn insert(&mut self, cmp: impl Fn(EnumIndex) -> Ordering, entry: DictEntry) -> bool {
        let mut pos = self.lower_bound(&cmp);
        if let Some(e) = self.entry_at(pos) {
            if cmp(e.key) == Ordering::Equal {
                return false;
            }
        }
        if self.leaves.is_empty() {
            self.leaves.push(Arc::new(Leaf::default()));
            pos = Position { leaf: 0, slot: 0 };
        } else if pos.leaf == self.leaves.len() {
            let last = self.leaves.len() - 1;
            pos = Position { leaf: last, slot: self.leaves[last].entries.len() };
        }
        self.insert_at(pos, entry);
        true
    }

    fn insert_at(&mut self, pos: Position, entry: DictEntry) {
        let leaf = Arc::make_mut(&mut self.leaves[pos.leaf]);
        leaf.entries.insert(pos.slot, entry);
        self.len += 1;
        if leaf.entries.len() > LEAF_CAPACITY {
            let tail = leaf.entries.split_off(LEAF_CAPACITY / 2);
            self.leaves.insert(pos.leaf + 1, Arc::new(Leaf { entries: tail }));
        }
    }

    /// 按顺序批量追加（调用方保证 `entry` 大于现有所有条目）
    pub fn push_back(&mut self, entry: DictEntry) {
        let need_leaf = self.leaves.last().map(|l| l.entries.len() >= LEAF_CAPACITY).unwrap_or(true);
        if need_leaf {
            self.leaves.push(Arc::new(Leaf { entries: Vec::with_capacity(LEAF_CAPACITY) }));
        }
        let last = self.leaves.len() - 1;
        Arc::make_mut(&mut self.leaves[last]).entries.push(entry);
        self.len += 1;
    }

    /// 删除位置上的条目，返回被删条目和删除后占据该位置的后继
    pub fn remove_at(&mut self, pos: Position) -> DictEntry {
        let leaf = Arc::make_mut(&mut self.leaves[pos.leaf]);
        let removed = leaf.entries.remove(pos.slot);
        if leaf.entries.is_empty() {
            self.leaves.remove(pos.leaf);
        }
        self.len -= 1;
        removed
    }

    /// 删除后 `pos` 上的条目（若删除导致叶子被移除，位置顺延到下一个叶子）
    pub fn normalize(&self, pos: Position) -> Position {
        match self.leaves.get(pos.leaf) {
            Some(l) if pos.slot < l.entries.len() => pos,
            Some(_) => Position { leaf: pos.leaf + 1, slot: 0 },
            None    => self.end(),
        }
    }

    /// 重写所有 key（compaction 后的重定位），顺序保持不变
    pub fn remap_keys(&mut self, mut f: impl FnMut(EnumIndex) -> EnumIndex) {
        for leaf in &mut self.leaves {
            for e in &mut Arc::make_mut(leaf).entries {
                e.key = f(e.key);
            }
        }
    }

    // ── 遍历 ──────────────────────────────────────────────────────────────────

    pub fn iter(&self) -> impl Iterator<Item = &DictEntry> + '_ {
        self.leaves.iter().flat_map(|l| l.entries.iter())
    }

    /// 从 `pos` 开始的有序遍历
    pub fn iter_from(&self, pos: Position) -> impl Iterator<Item = &DictEntry> + '_ {
        let first = self.leaves.get(pos.leaf).map(|l| &l.entries[pos.slot.min(l.entries.len())..]);
        first
            .into_iter()
            .flatten()
            .chain(self.leaves.iter().skip(pos.leaf + 1).flat_map(|l| l.entries.iter()))
    }

    pub fn num_leaves(&self) -> usize { self.leaves.len() }
}
