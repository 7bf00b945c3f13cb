use super::row::{Row, Value};
use quartzdb_primitives::{ColSet, RowId};
use std::collections::btree_set::{self, BTreeSet};
use std::ops::Bound;

/// Key of one index entry: the projected column values plus the row id,
/// so duplicate keys coexist and deletes can target one row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey {
    key: Vec<Value>,
    row_id: RowId,
}

/// An iterator over the row ids whose projected key equals the sought
/// value.
pub struct IndexRangeIter<'a> {
    range_iter: btree_set::Range<'a, IndexKey>,
    key: &'a [Value],
}

impl Iterator for IndexRangeIter<'_> {
    type Item = RowId;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.range_iter.next()?;
        if entry.key == self.key {
            Some(entry.row_id)
        } else {
            None
        }
    }
}

/// A secondary index over a row store: an ordered set of
/// (projected key, row id) pairs.
pub struct BTreeIndex {
    pub name: Box<str>,
    pub cols: ColSet,
    pub is_unique: bool,
    idx: BTreeSet<IndexKey>,
}

impl BTreeIndex {
    pub fn new(name: &str, cols: ColSet, is_unique: bool) -> Self {
        Self {
            name: name.into(),
            cols,
            is_unique,
            idx: BTreeSet::new(),
        }
    }

    pub fn project(&self, row: &Row) -> Vec<Value> {
        self.cols
            .iter()
            .map(|col| row.values.get(col as usize).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn insert(&mut self, row: &Row) {
        let key = self.project(row);
        self.idx.insert(IndexKey { key, row_id: row.id });
    }

    pub fn delete(&mut self, row: &Row) {
        let key = self.project(row);
        self.idx.remove(&IndexKey { key, row_id: row.id });
    }

    /// Whether inserting `row` would put a second entry under a key the
    /// unique index already holds.
    pub fn violates_unique_constraint(&self, row: &Row) -> bool {
        self.is_unique && self.contains_key(&self.project(row))
    }

    pub fn contains_key(&self, key: &[Value]) -> bool {
        self.seek(key).next().is_some()
    }

    /// All row ids filed under exactly `key`.
    pub fn seek<'a>(&'a self, key: &'a [Value]) -> IndexRangeIter<'a> {
        let start = Bound::Included(IndexKey {
            key: key.to_vec(),
            row_id: RowId(0),
        });
        let end = Bound::Included(IndexKey {
            key: key.to_vec(),
            row_id: RowId(u64::MAX),
        });
        IndexRangeIter {
            range_iter: self.idx.range((start, end)),
            key,
        }
    }

    /// Every row id in key order.
    pub fn scan(&self) -> impl Iterator<Item = RowId> + '_ {
        self.idx.iter().map(|entry| entry.row_id)
    }

    pub fn build_from_rows<'a>(&mut self, rows: impl Iterator<Item = &'a Row>) {
        for row in rows {
            self.insert(row);
        }
    }

    pub fn clear(&mut self) {
        self.idx.clear();
    }

    pub fn num_keys(&self) -> usize {
        self.idx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::row::RowVersion;

    fn row(id: u64, v: i64) -> Row {
        Row::new(RowId(id), vec![Value::Int(v)], RowVersion::committed(1))
    }

    fn index() -> BTreeIndex {
        BTreeIndex::new("idx_v", [0u16].into_iter().collect(), false)
    }

    #[test]
    fn seek_finds_all_duplicates_and_nothing_else() {
        let mut idx = index();
        idx.insert(&row(1, 10));
        idx.insert(&row(2, 10));
        idx.insert(&row(3, 20));
        let hits: Vec<RowId> = idx.seek(&[Value::Int(10)]).collect();
        assert_eq!(hits, vec![RowId(1), RowId(2)]);
        assert!(idx.seek(&[Value::Int(15)]).next().is_none());
    }

    #[test]
    fn unique_index_reports_violation() {
        let mut idx = BTreeIndex::new("idx_u", [0u16].into_iter().collect(), true);
        idx.insert(&row(1, 10));
        assert!(idx.violates_unique_constraint(&row(2, 10)));
        assert!(!idx.violates_unique_constraint(&row(2, 11)));
    }

    #[test]
    fn delete_removes_only_the_given_row() {
        let mut idx = index();
        idx.insert(&row(1, 10));
        idx.insert(&row(2, 10));
        idx.delete(&row(1, 10));
        let hits: Vec<RowId> = idx.seek(&[Value::Int(10)]).collect();
        assert_eq!(hits, vec![RowId(2)]);
    }
}
