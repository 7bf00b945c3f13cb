//! Small, dependency-light types shared across the QuartzDB kernel:
//! id newtypes, privilege bit sets and the enums that name transaction
//! manager modes and isolation levels.

mod col_set;
mod ids;
mod privilege;

pub use col_set::ColSet;
pub use ids::{FilePos, RowId, SessionId, TxTimestamp};
pub use privilege::{Privilege, PrivilegeSet};

use std::fmt;

/// The kind tag carried by every interned object name.
///
/// `Domain` and `Type` are distinct kinds resolving in a shared
/// per-schema namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Schema,
    Table,
    View,
    Column,
    Index,
    Constraint,
    Sequence,
    Routine,
    Trigger,
    Type,
    Domain,
    Charset,
    Collation,
    Reference,
    Grantee,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Schema => "SCHEMA",
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Column => "COLUMN",
            ObjectKind::Index => "INDEX",
            ObjectKind::Constraint => "CONSTRAINT",
            ObjectKind::Sequence => "SEQUENCE",
            ObjectKind::Routine => "ROUTINE",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::Type => "TYPE",
            ObjectKind::Domain => "DOMAIN",
            ObjectKind::Charset => "CHARACTER SET",
            ObjectKind::Collation => "COLLATION",
            ObjectKind::Reference => "REFERENCE",
            ObjectKind::Grantee => "GRANTEE",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL transaction isolation level.
///
/// READ UNCOMMITTED is accepted at SET time but the engine does not
/// implement dirty reads; it is rewritten to READ COMMITTED by
/// [`IsolationLevel::normalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn normalized(self) -> Self {
        match self {
            IsolationLevel::ReadUncommitted => IsolationLevel::ReadCommitted,
            other => other,
        }
    }

    /// Whether read locks taken for a statement are held until the end
    /// of the transaction rather than the end of the statement.
    pub fn holds_read_locks(self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead | IsolationLevel::Serializable)
    }

    /// Whether readers observe a transaction-start snapshot (as opposed
    /// to a statement-start snapshot) under multi-version modes.
    pub fn uses_transaction_snapshot(self) -> bool {
        self.holds_read_locks()
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        })
    }
}

/// Concurrency control mode of the transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Strict two-phase locking.
    Locks,
    /// Two-phase locking for writers, versioned reads for read-only
    /// transactions.
    MvLocks,
    /// Multi-version concurrency control, no data locks.
    Mvcc,
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxMode::Locks => "LOCKS",
            TxMode::MvLocks => "MVLOCKS",
            TxMode::Mvcc => "MVCC",
        })
    }
}
