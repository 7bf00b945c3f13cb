use super::row::Row;
use crate::db::names::QName;
use quartzdb_primitives::{ColSet, RowId, SessionId, TxTimestamp};

/// What a row action does to its row, after folding together the
/// operations one transaction performed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Insert,
    Delete,
    /// Inserted and deleted by the same transaction; never visible to
    /// anyone else.
    InsertDelete,
    /// A delete whose version can never be needed again. Illegal for
    /// hybrid stores; emitted only by stores that keep no versions.
    DeleteFinal,
    /// Logically erased, skipped by commit and rollback.
    None,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Insert => "INSERT",
            ActionKind::Delete => "DELETE",
            ActionKind::InsertDelete => "INSERT_DELETE",
            ActionKind::DeleteFinal => "DELETE_FINAL",
            ActionKind::None => "NONE",
        }
    }
}

/// One row mutation, owned by exactly one session's action log.
///
/// `commit_timestamp` stays zero until the owning transaction commits.
/// Updates are decomposed into delete plus insert; `changed_cols`
/// carries the changed-column mask across the pair. The `row` field
/// keeps the row image so a rolled-back delete can be reinstated even
/// after the store dropped it.
#[derive(Debug, Clone)]
pub struct RowAction {
    pub kind: ActionKind,
    pub session: SessionId,
    pub table: QName,
    pub row_id: RowId,
    pub timestamp: TxTimestamp,
    pub commit_timestamp: TxTimestamp,
    pub changed_cols: Option<ColSet>,
    pub row: Row,
}

impl RowAction {
    pub fn insert(session: SessionId, table: QName, row: Row, timestamp: TxTimestamp) -> Self {
        Self {
            kind: ActionKind::Insert,
            session,
            table,
            row_id: row.id,
            timestamp,
            commit_timestamp: 0,
            changed_cols: None,
            row,
        }
    }

    pub fn delete(session: SessionId, table: QName, row: Row, timestamp: TxTimestamp) -> Self {
        Self {
            kind: ActionKind::Delete,
            session,
            table,
            row_id: row.id,
            timestamp,
            commit_timestamp: 0,
            changed_cols: None,
            row,
        }
    }
}
