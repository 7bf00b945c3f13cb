//! The table-level lock registry used by the two-phase locking modes.
//!
//! Acquisition is not FIFO: whenever a session releases its locks, every
//! waiter's waited-set is recomputed from scratch against these maps.

use crate::db::names::QName;
use quartzdb_primitives::SessionId;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct LockTable {
    write_locks: HashMap<QName, SessionId>,
    read_locks: HashMap<QName, HashSet<SessionId>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the set of sessions `session` must wait on before its
    /// statement can lock its declared read and write sets.
    ///
    /// A statement holding the catalog lock (DDL) seeds the set with
    /// every other transacting session. Write targets conflict with the
    /// current writer and all current readers; read targets conflict
    /// with the current writer only. The caller decides what to do with
    /// a non-empty result (park, or abort on a would-be cycle).
    pub fn waited_sessions(
        &self,
        session: SessionId,
        write_set: &[QName],
        read_set: &[QName],
        catalog_lock: bool,
        other_transacting: &[SessionId],
    ) -> HashSet<SessionId> {
        let mut waited = HashSet::new();
        if catalog_lock {
            waited.extend(other_transacting.iter().copied().filter(|s| *s != session));
        }
        for name in write_set {
            if let Some(writer) = self.write_locks.get(name) {
                if *writer != session {
                    waited.insert(*writer);
                }
            }
            if let Some(readers) = self.read_locks.get(name) {
                waited.extend(readers.iter().copied().filter(|s| *s != session));
            }
        }
        for name in read_set {
            if let Some(writer) = self.write_locks.get(name) {
                if *writer != session {
                    waited.insert(*writer);
                }
            }
        }
        waited
    }

    /// Commits the reservations a cleared waited-set computation made.
    pub fn lock(&mut self, session: SessionId, write_set: &[QName], read_set: &[QName]) {
        for name in write_set {
            self.write_locks.insert(name.clone(), session);
        }
        for name in read_set {
            self.read_locks.entry(name.clone()).or_default().insert(session);
        }
    }

    /// Releases the session's read locks on the given names; used at
    /// statement end under the short-read-lock isolation levels.
    pub fn release_reads(&mut self, session: SessionId, read_set: &[QName]) {
        for name in read_set {
            if let Some(readers) = self.read_locks.get_mut(name) {
                readers.remove(&session);
                if readers.is_empty() {
                    self.read_locks.remove(name);
                }
            }
        }
    }

    /// Drops every lock the session holds.
    pub fn unlock_all(&mut self, session: SessionId) {
        self.write_locks.retain(|_, holder| *holder != session);
        self.read_locks.retain(|_, readers| {
            readers.remove(&session);
            !readers.is_empty()
        });
    }

    pub fn write_holder(&self, name: &QName) -> Option<SessionId> {
        self.write_locks.get(name).copied()
    }

    pub fn readers_of(&self, name: &QName) -> impl Iterator<Item = SessionId> + '_ {
        self.read_locks.get(name).into_iter().flatten().copied()
    }

    pub fn holds_any(&self, session: SessionId) -> bool {
        self.write_locks.values().any(|s| *s == session)
            || self.read_locks.values().any(|readers| readers.contains(&session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::names::NameRegistry;
    use quartzdb_primitives::ObjectKind;

    fn names(n: usize) -> Vec<QName> {
        let reg = NameRegistry::new();
        (0..n)
            .map(|i| reg.new_name(&format!("T{i}"), false, ObjectKind::Table))
            .collect()
    }

    #[test]
    fn writer_blocks_both_readers_and_writers() {
        let t = names(1);
        let mut locks = LockTable::new();
        locks.lock(SessionId(1), &t, &[]);
        let waited = locks.waited_sessions(SessionId(2), &t, &[], false, &[]);
        assert_eq!(waited, HashSet::from([SessionId(1)]));
        let waited = locks.waited_sessions(SessionId(2), &[], &t, false, &[]);
        assert_eq!(waited, HashSet::from([SessionId(1)]));
    }

    #[test]
    fn readers_share_but_block_writers() {
        let t = names(1);
        let mut locks = LockTable::new();
        locks.lock(SessionId(1), &[], &t);
        locks.lock(SessionId(2), &[], &t);
        assert!(locks.waited_sessions(SessionId(3), &[], &t, false, &[]).is_empty());
        let waited = locks.waited_sessions(SessionId(3), &t, &[], false, &[]);
        assert_eq!(waited, HashSet::from([SessionId(1), SessionId(2)]));
    }

    #[test]
    fn own_locks_never_appear_in_the_waited_set() {
        let t = names(1);
        let mut locks = LockTable::new();
        locks.lock(SessionId(1), &t, &t);
        assert!(locks.waited_sessions(SessionId(1), &t, &t, false, &[]).is_empty());
    }

    #[test]
    fn catalog_lock_seeds_every_other_transacting_session() {
        let locks = LockTable::new();
        let transacting = [SessionId(1), SessionId(2), SessionId(3)];
        let waited = locks.waited_sessions(SessionId(2), &[], &[], true, &transacting);
        assert_eq!(waited, HashSet::from([SessionId(1), SessionId(3)]));
    }

    #[test]
    fn release_reads_leaves_write_locks_alone() {
        let t = names(2);
        let mut locks = LockTable::new();
        locks.lock(SessionId(1), &t[..1], &t[1..]);
        locks.release_reads(SessionId(1), &t[1..]);
        assert!(locks.holds_any(SessionId(1)));
        assert!(locks.waited_sessions(SessionId(2), &[], &t[1..], false, &[]).is_empty());
        assert_eq!(locks.write_holder(&t[0]), Some(SessionId(1)));
        locks.unlock_all(SessionId(1));
        assert!(!locks.holds_any(SessionId(1)));
    }
}
