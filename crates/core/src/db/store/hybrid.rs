use super::action::{ActionKind, RowAction};
use super::cache::{HashMapRowCache, RowCache};
use super::index::BTreeIndex;
use super::row::{Row, RowVersion};
use crate::db::names::QName;
use crate::error::{Result, StoreError};
use indexmap::IndexMap;
use quartzdb_primitives::{ColSet, FilePos, RowId, SessionId, TxMode, TxTimestamp};
use std::collections::BTreeMap;

/// A row container that starts in memory and promotes itself into the
/// disk-backed [`RowCache`] once the configured memory row count is
/// exceeded.
///
/// Rows keep their monotone ids across promotion; the primary order of
/// a cached store is the insertion order recorded in the position map.
/// Physical removal of committed deletes is deferred under the
/// multi-version modes until the watermark passes them.
pub struct HybridRowStore {
    table: QName,
    column_count: usize,
    mem: BTreeMap<RowId, Row>,
    positions: IndexMap<RowId, FilePos>,
    cache: Box<dyn RowCache>,
    cached: bool,
    indexes: Vec<BTreeIndex>,
    row_id_seq: u64,
    max_memory_rows: usize,
    null_present: Vec<bool>,
}

impl HybridRowStore {
    pub fn new(table: QName, column_count: usize, max_memory_rows: usize) -> Self {
        Self::with_cache(table, column_count, max_memory_rows, Box::<HashMapRowCache>::default())
    }

    pub fn with_cache(
        table: QName,
        column_count: usize,
        max_memory_rows: usize,
        cache: Box<dyn RowCache>,
    ) -> Self {
        Self {
            table,
            column_count,
            mem: BTreeMap::new(),
            positions: IndexMap::new(),
            cache,
            cached: false,
            indexes: Vec::new(),
            row_id_seq: 0,
            max_memory_rows,
            null_present: vec![false; column_count],
        }
    }

    pub fn table(&self) -> &QName {
        &self.table
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn row_count(&self) -> usize {
        if self.cached {
            self.positions.len()
        } else {
            self.mem.len()
        }
    }

    /// Whether any row ever stored a NULL in `col`. OR-updated on every
    /// add and reset only by [`Self::remove_all`], so it stays valid
    /// without consulting an index.
    pub fn has_nulls(&self, col: usize) -> bool {
        self.null_present.get(col).copied().unwrap_or(false)
    }

    pub fn next_row_id(&mut self) -> RowId {
        self.row_id_seq += 1;
        RowId(self.row_id_seq)
    }

    /// Files a row in every secondary index.
    pub fn index_row(&mut self, row: &Row) {
        for index in &mut self.indexes {
            index.insert(row);
        }
    }

    fn deindex_row(&mut self, row: &Row) {
        for index in &mut self.indexes {
            index.delete(row);
        }
    }

    /// Adds a row under a fresh id and files it in every index.
    /// Crossing the memory threshold promotes the store first.
    pub fn add(&mut self, values: Vec<super::row::Value>, version: RowVersion) -> RowId {
        let id = self.next_row_id();
        let row = Row::new(id, values, version);
        for (col, flag) in self.null_present.iter_mut().enumerate() {
            *flag |= row.values.get(col).is_some_and(|v| v.is_null());
        }
        self.index_row(&row);
        if self.cached {
            let pos = self.cache.allocate(&row);
            self.positions.insert(id, pos);
        } else {
            self.mem.insert(id, row);
            if self.mem.len() > self.max_memory_rows {
                self.change_to_disk();
            }
        }
        id
    }

    pub fn get(&self, id: RowId) -> Option<Row> {
        if let Some(row) = self.mem.get(&id) {
            return Some(row.clone());
        }
        self.positions.get(&id).and_then(|pos| self.cache.get(*pos))
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.mem.contains_key(&id) || self.positions.contains_key(&id)
    }

    pub(crate) fn update_version(&mut self, id: RowId, f: impl FnOnce(&mut RowVersion)) -> Result<()> {
        if let Some(row) = self.mem.get_mut(&id) {
            f(&mut row.version);
            return Ok(());
        }
        let pos = *self.positions.get(&id).ok_or(StoreError::RowNotFound(id))?;
        let mut row = self.cache.get(pos).ok_or(StoreError::CacheMiss(id))?;
        f(&mut row.version);
        self.cache.put(pos, &row);
        Ok(())
    }

    /// Physically removes a row and its index entries.
    pub fn remove(&mut self, id: RowId) -> Option<Row> {
        let row = if let Some(row) = self.mem.remove(&id) {
            row
        } else {
            let pos = self.positions.shift_remove(&id)?;
            let row = self.cache.get(pos)?;
            self.cache.free(pos);
            row
        };
        self.deindex_row(&row);
        Some(row)
    }

    /// Reinstates a row that was physically dropped, keeping its id.
    fn reinsert(&mut self, row: Row) {
        self.index_row(&row);
        if self.cached {
            let pos = self.cache.allocate(&row);
            self.positions.insert(row.id, pos);
        } else {
            self.mem.insert(row.id, row);
        }
    }

    pub fn add_index(&mut self, name: &str, cols: ColSet, is_unique: bool) {
        let mut index = BTreeIndex::new(name, cols, is_unique);
        if self.cached {
            let rows = self.scan();
            index.build_from_rows(rows.iter());
        } else {
            index.build_from_rows(self.mem.values());
        }
        self.indexes.push(index);
    }

    pub fn indexes(&self) -> &[BTreeIndex] {
        &self.indexes
    }

    /// Every row in primary order: row-id order in memory, recorded
    /// insertion order once cached.
    pub fn scan(&self) -> Vec<Row> {
        if self.cached {
            self.positions
                .values()
                .filter_map(|pos| self.cache.get(*pos))
                .collect()
        } else {
            self.mem.values().cloned().collect()
        }
    }

    /// The rows a viewer observes under the given snapshot; see
    /// [`RowVersion::is_visible`].
    pub fn scan_visible(&self, viewer: SessionId, snapshot: TxTimestamp) -> Vec<Row> {
        self.scan()
            .into_iter()
            .filter(|row| row.version.is_visible(viewer, snapshot))
            .collect()
    }

    /// Applies the committed effect of one action.
    ///
    /// Inserts only stamp the commit timestamp. Deletes are physical
    /// under plain locking but deferred under the multi-version modes,
    /// where the prior version stays readable until the watermark
    /// passes its commit timestamp. `DELETE_FINAL` belongs to stores
    /// without version heads and is rejected here.
    pub fn commit_row(
        &mut self,
        id: RowId,
        kind: ActionKind,
        mode: TxMode,
        commit_ts: TxTimestamp,
    ) -> Result<()> {
        match kind {
            ActionKind::Insert => self.update_version(id, |v| v.created_at = commit_ts),
            ActionKind::Delete => match mode {
                TxMode::Locks => {
                    self.remove(id);
                    Ok(())
                }
                TxMode::MvLocks | TxMode::Mvcc => self.update_version(id, |v| v.deleted_at = commit_ts),
            },
            ActionKind::InsertDelete => {
                self.remove(id);
                Ok(())
            }
            ActionKind::DeleteFinal => Err(StoreError::IllegalCommitAction("DELETE_FINAL").into()),
            ActionKind::None => Ok(()),
        }
    }

    /// Reverses the uncommitted effect of one action.
    pub fn rollback_row(&mut self, action: &RowAction) -> Result<()> {
        match action.kind {
            ActionKind::Insert | ActionKind::InsertDelete => {
                self.remove(action.row_id);
                Ok(())
            }
            ActionKind::Delete => {
                if self.contains(action.row_id) {
                    self.update_version(action.row_id, |v| {
                        v.deleted_by = None;
                        v.deleted_at = 0;
                    })
                } else {
                    let mut row = action.row.clone();
                    row.version.deleted_by = None;
                    row.version.deleted_at = 0;
                    self.reinsert(row);
                    Ok(())
                }
            }
            ActionKind::DeleteFinal | ActionKind::None => Ok(()),
        }
    }

    /// Purges versions no live transaction can still see: rows whose
    /// delete committed at or before the watermark.
    pub fn finalize(&mut self, watermark: TxTimestamp) {
        let doomed: Vec<RowId> = self
            .scan()
            .into_iter()
            .filter(|row| row.version.deleted_at != 0 && row.version.deleted_at <= watermark)
            .map(|row| row.id)
            .collect();
        for id in doomed {
            self.remove(id);
        }
    }

    pub fn remove_all(&mut self) {
        for pos in self.positions.values() {
            self.cache.free(*pos);
        }
        self.positions.clear();
        self.mem.clear();
        for index in &mut self.indexes {
            index.clear();
        }
        self.null_present = vec![false; self.column_count];
    }

    /// Promotes the store: every row is relinked into a fresh cache
    /// slot in primary-index order, the indexes are rebuilt against the
    /// disk representations and the in-memory tree is discarded.
    pub fn change_to_disk(&mut self) {
        if self.cached {
            return;
        }
        log::trace!("STORE PROMOTING: {} rows={}", self.table, self.mem.len());
        let rows: Vec<Row> = self.mem.values().cloned().collect();
        for row in &rows {
            let pos = self.cache.allocate(row);
            self.positions.insert(row.id, pos);
        }
        self.mem.clear();
        self.cached = true;
        for index in &mut self.indexes {
            index.clear();
            index.build_from_rows(rows.iter());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;
    use crate::db::store::row::Value;
    use quartzdb_primitives::{ObjectKind, SessionId};

    fn store(max_memory_rows: usize) -> HybridRowStore {
        let table = NameRegistry::new().new_name("T", false, ObjectKind::Table);
        HybridRowStore::new(table, 2, max_memory_rows)
    }

    fn committed_row(v: i64) -> (Vec<Value>, RowVersion) {
        (vec![Value::Int(v), Value::Null], RowVersion::committed(1))
    }

    #[test]
    fn ids_are_monotone_across_promotion() {
        let mut s = store(2);
        let (vals, ver) = committed_row(1);
        let a = s.add(vals, ver.clone());
        let (vals, _) = committed_row(2);
        let b = s.add(vals, ver.clone());
        assert!(!s.is_cached());
        let (vals, _) = committed_row(3);
        let c = s.add(vals, ver);
        assert!(s.is_cached());
        assert!(a < b && b < c);
        assert_eq!(s.row_count(), 3);
    }

    #[test]
    fn promotion_preserves_rows_and_indexes() {
        let mut s = store(4);
        s.add_index("idx_v", [0u16].into_iter().collect(), false);
        for v in 1..=4 {
            let (vals, ver) = committed_row(v);
            s.add(vals, ver);
        }
        let before = s.scan();
        s.change_to_disk();
        assert!(s.is_cached());
        assert_eq!(s.scan(), before);
        assert_eq!(s.indexes()[0].num_keys(), 4);
        let hits: Vec<RowId> = s.indexes()[0].seek(&[Value::Int(3)]).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(s.get(hits[0]).unwrap().values[0], Value::Int(3));
    }

    #[test]
    fn null_bitmap_is_sticky_until_remove_all() {
        let mut s = store(10);
        let (vals, ver) = committed_row(1);
        s.add(vals, ver.clone());
        assert!(!s.has_nulls(0));
        assert!(s.has_nulls(1));
        s.remove_all();
        assert!(!s.has_nulls(1));
        assert_eq!(s.row_count(), 0);
    }

    #[test]
    fn delete_final_is_fatal_for_hybrid_stores() {
        let mut s = store(10);
        let (vals, ver) = committed_row(1);
        let id = s.add(vals, ver);
        assert!(s.commit_row(id, ActionKind::DeleteFinal, TxMode::Locks, 5).is_err());
    }

    #[test]
    fn mv_delete_defers_removal_until_finalize() {
        let mut s = store(10);
        let (vals, ver) = committed_row(1);
        let id = s.add(vals, ver);
        s.update_version(id, |v| v.deleted_by = Some(SessionId(7))).unwrap();
        s.commit_row(id, ActionKind::Delete, TxMode::Mvcc, 9).unwrap();
        // An old snapshot still reads the row.
        assert_eq!(s.scan_visible(SessionId(1), 8).len(), 1);
        assert_eq!(s.scan_visible(SessionId(1), 9).len(), 0);
        s.finalize(8);
        assert_eq!(s.row_count(), 1);
        s.finalize(9);
        assert_eq!(s.row_count(), 0);
    }

    #[test]
    fn rollback_of_delete_reinstates_the_row() {
        let mut s = store(10);
        let (vals, ver) = committed_row(1);
        let id = s.add(vals, ver);
        let row = s.get(id).unwrap();
        let action = RowAction::delete(SessionId(1), s.table().clone(), row, 3);
        // Locks mode removed the row physically at commit; a statement
        // level rollback sees it gone and reinstates from the action.
        s.remove(id);
        s.rollback_row(&action).unwrap();
        assert_eq!(s.row_count(), 1);
        assert_eq!(s.get(id).unwrap().values[0], Value::Int(1));
    }
}
