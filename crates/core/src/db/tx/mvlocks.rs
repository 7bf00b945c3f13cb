//! Multi-version two-phase locking: the lock discipline of the LOCKS
//! mode for writers, while read-only transactions bypass the lock
//! table entirely and observe the versioned state as of their
//! transaction timestamp.

use crate::db::names::QName;
use crate::session::{Session, Statement};
use quartzdb_primitives::TxTimestamp;

pub(crate) fn lock_sets(session: &Session, stmt: &Statement) -> (Vec<QName>, Vec<QName>) {
    if session.is_read_only() {
        // Versioned reads need no table locks; the catalog gate in
        // `begin_action` still holds such sessions out during DDL.
        (Vec::new(), Vec::new())
    } else {
        (stmt.write_set.to_vec(), stmt.read_set.to_vec())
    }
}

pub(crate) fn read_snapshot(session: &Session) -> TxTimestamp {
    if session.is_read_only() {
        session.transaction_timestamp()
    } else {
        TxTimestamp::MAX
    }
}
