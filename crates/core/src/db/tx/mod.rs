//! The transaction manager: timestamps, lock scheduling, commit and
//! rollback across the three concurrency-control modes.
//!
//! One manager serves the whole database. Its state sits behind a
//! single write lock; sessions never block while holding it. The only
//! suspension point in the kernel is the latch wait inside
//! [`TxManager::begin_action`].
//!
//! Lock acquisition order:
//! 1. the manager's `inner` lock
//! 2. session field mutexes
//! 3. the catalog / grantee-manager locks
//! 4. per-table store locks
//!
//! Code below may take later locks while holding earlier ones, never
//! the reverse.

mod common;
pub(crate) mod locks;
pub(crate) mod mvcc;
pub(crate) mod mvlocks;

pub(crate) use common::{ModeTraits, TxCommon, WaitContext};

use crate::db::database::Database;
use crate::db::store::{ActionKind, RowAction};
use crate::error::{Result, TxError};
use crate::session::{Session, Statement};
use parking_lot::RwLock;
use quartzdb_primitives::{SessionId, TxMode, TxTimestamp};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

pub(crate) struct ManagerInner {
    pub(crate) mode: TxMode,
    pub(crate) traits: ModeTraits,
    pub(crate) common: TxCommon,
    /// The one session allowed to change the catalog at a time.
    pub(crate) catalog_write_session: Option<SessionId>,
    /// Set while a catalog change is in flight; gates readers under
    /// MVCC until the DDL transaction ends.
    pub(crate) locked_mode: bool,
}

pub struct TxManager {
    inner: RwLock<ManagerInner>,
}

enum Decision {
    Proceed,
    Wait,
    Deadlock,
}

impl TxManager {
    pub fn new(mode: TxMode) -> Self {
        Self {
            inner: RwLock::new(ManagerInner {
                mode,
                traits: ModeTraits::for_mode(mode),
                common: TxCommon::new(),
                catalog_write_session: None,
                locked_mode: false,
            }),
        }
    }

    pub fn mode(&self) -> TxMode {
        self.inner.read().mode
    }

    /// Switches the concurrency-control mode. Only permitted while at
    /// most one transaction is live; the change counter and the live
    /// list carry over, and the displaced mode is gone for good.
    pub fn set_mode(&self, new_mode: TxMode) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.common.live_timestamps.len() > 1 {
            return Err(TxError::InvalidTransactionState(
                "cannot switch transaction mode with concurrent transactions live".into(),
            )
            .into());
        }
        if inner.mode != new_mode {
            log::trace!("TXMANAGER MODE: {} -> {}", inner.mode, new_mode);
            inner.mode = new_mode;
            inner.traits = ModeTraits::for_mode(new_mode);
        }
        Ok(())
    }

    pub fn next_timestamp(&self) -> TxTimestamp {
        self.inner.read().common.next_timestamp()
    }

    /// The most recently issued change timestamp.
    pub fn current_timestamp(&self) -> TxTimestamp {
        self.inner.read().common.current_timestamp()
    }

    pub fn transaction_count(&self) -> u64 {
        self.inner.read().common.transaction_count()
    }

    pub fn live_timestamps(&self) -> Vec<TxTimestamp> {
        self.inner.read().common.live_timestamps.iter().copied().collect()
    }

    /// The snapshot timestamp a read by `session` observes right now.
    pub(crate) fn read_snapshot(&self, session: &Session) -> TxTimestamp {
        let inner = self.inner.read();
        match inner.mode {
            TxMode::Locks => locks::read_snapshot(session),
            TxMode::MvLocks => mvlocks::read_snapshot(session),
            TxMode::Mvcc => mvcc::read_snapshot(session),
        }
    }

    /// Opens a transaction for the session if none is running: assigns
    /// the transaction timestamp and enters it into the live list.
    pub(crate) fn begin_transaction(&self, session: &Session) {
        if session.is_transaction.load(Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.write();
        let ts = inner.common.next_timestamp();
        session.transaction_timestamp.store(ts, Ordering::SeqCst);
        session.action_timestamp.store(ts, Ordering::SeqCst);
        session.is_transaction.store(true, Ordering::SeqCst);
        inner.common.add_live(ts);
    }

    /// Clears the statement to run, or parks the session until it can.
    ///
    /// Each pass computes the waited set under the manager lock. An
    /// empty set locks the statement's tables and stamps the statement
    /// timestamps. A non-empty set either parks the session on its
    /// latch (counted once per waited session) or, when granting would
    /// close a cycle in the wait graph, aborts the whole transaction.
    pub(crate) fn begin_action(&self, db: &Database, session: &Session, stmt: &Statement) -> Result<()> {
        if session.abort_transaction.load(Ordering::SeqCst) {
            self.rollback(db, session);
            return Err(TxError::StatementAborted.into());
        }
        self.begin_transaction(session);
        if stmt.timeout_secs > 0 {
            session.current_timeout.store(stmt.timeout_secs as i64, Ordering::SeqCst);
        }
        loop {
            let decision = {
                let mut inner = self.inner.write();
                let (write_set, read_set) = match inner.mode {
                    TxMode::Locks => locks::lock_sets(session, stmt),
                    TxMode::MvLocks => mvlocks::lock_sets(session, stmt),
                    TxMode::Mvcc => mvcc::lock_sets(session, stmt),
                };
                let mut waited = inner.common.locks.waited_sessions(
                    session.id,
                    &write_set,
                    &read_set,
                    stmt.is_catalog_change,
                    &db.transacting_sessions(),
                );
                // DDL is single-writer in every mode, and an in-flight
                // catalog change gates everyone else.
                match inner.catalog_write_session {
                    Some(holder) if holder != session.id => {
                        waited.insert(holder);
                    }
                    _ => {}
                }
                *session.wait_context.lock() = Some(WaitContext {
                    write_set: write_set.clone(),
                    read_set: read_set.clone(),
                    catalog_lock: stmt.is_catalog_change,
                });
                if waited.is_empty() {
                    if stmt.is_catalog_change {
                        inner.catalog_write_session = Some(session.id);
                        inner.locked_mode = true;
                    }
                    inner.common.locks.lock(session.id, &write_set, &read_set);
                    let ts = inner.common.next_timestamp();
                    session.action_timestamp.store(ts, Ordering::SeqCst);
                    session.statement_start_timestamp.store(ts, Ordering::SeqCst);
                    session
                        .statement_start_index
                        .store(session.actions.lock().len(), Ordering::SeqCst);
                    session.in_statement.store(true, Ordering::SeqCst);
                    Decision::Proceed
                } else if !check_deadlock(db, session.id, &waited) {
                    session.abort_transaction.store(true, Ordering::SeqCst);
                    Decision::Deadlock
                } else {
                    register_waits(db, session, &waited);
                    session.latch.set(waited.len());
                    Decision::Wait
                }
            };
            match decision {
                Decision::Proceed => return Ok(()),
                Decision::Deadlock => {
                    self.rollback(db, session);
                    return Err(TxError::StatementAborted.into());
                }
                Decision::Wait => {
                    let timeout = match session.current_timeout.load(Ordering::SeqCst) {
                        t if t > 0 => Some(Duration::from_secs(t as u64)),
                        _ => None,
                    };
                    let reached_zero = session.latch.wait(timeout);
                    {
                        let _inner = self.inner.write();
                        clear_waits(db, session);
                    }
                    if session.abort_transaction.load(Ordering::SeqCst) {
                        self.rollback(db, session);
                        return Err(TxError::StatementAborted.into());
                    }
                    if session.abort_action.swap(false, Ordering::SeqCst) || !reached_zero {
                        // An interrupted wait aborts the whole
                        // transaction when the interrupt-rollback
                        // setting says so, otherwise just the statement.
                        if db.config().tx_interrupt_rollback {
                            self.rollback(db, session);
                        } else {
                            session.reset_statement_state();
                        }
                        return Err(TxError::StatementAborted.into());
                    }
                    // Woken: the waited set may have changed; retry.
                }
            }
        }
    }

    /// Statement end: under the short-read-lock isolation levels the
    /// statement's read locks are released and waiters blocked only on
    /// them are re-evaluated.
    pub(crate) fn end_action(&self, db: &Database, session: &Session) {
        session.current_timeout.store(0, Ordering::SeqCst);
        session.in_statement.store(false, Ordering::SeqCst);
        let ctx = session.wait_context.lock().clone();
        let Some(ctx) = ctx else { return };
        if session.isolation().holds_read_locks() || ctx.read_set.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        if !inner.traits.uses_data_locks {
            return;
        }
        inner.common.locks.release_reads(session.id, &ctx.read_set);
        requeue_waiters(&mut inner, db, session);
    }

    /// The commit pipeline: conflict validation, persistence of the
    /// row-action log, the commit-log append, version finalization and
    /// the unlock/wake step.
    pub(crate) fn commit(&self, db: &Database, session: &Session) -> Result<()> {
        if !session.in_transaction() {
            session.reset_statement_state();
            return Ok(());
        }
        if session.tx_conflict.load(Ordering::SeqCst) || session.abort_transaction.load(Ordering::SeqCst) {
            self.rollback(db, session);
            return Err(TxError::SerializationFailure.into());
        }
        let mut inner = self.inner.write();
        let mode = inner.mode;
        let commit_ts = inner.common.next_timestamp();

        let mut touched = Vec::new();
        let any_writes = {
            let mut log = session.actions.lock();
            fold_insert_delete(&mut log);
            let mut wrote = false;
            for action in log.iter_mut() {
                if action.kind == ActionKind::None {
                    continue;
                }
                action.commit_timestamp = commit_ts;
                let Some(store) = db.try_store_of(&action.table) else {
                    continue;
                };
                store.write().commit_row(action.row_id, action.kind, mode, commit_ts)?;
                db.adjust_lob_usage(action);
                if !touched.contains(&action.table) {
                    touched.push(action.table.clone());
                }
                wrote = true;
            }
            log.clear();
            wrote
        };

        if any_writes {
            if let Err(e) = db.commit_log().write_commit(session.id, commit_ts) {
                log::warn!("commit log append failed for session {}: {e}", session.id);
            }
        }
        let sequences: Vec<_> = session.touched_sequences.lock().drain(..).collect();
        for seq in sequences {
            if let Err(e) = db.commit_log().write_sequence(session.id, &seq) {
                log::warn!("sequence log append failed for session {}: {e}", session.id);
            }
        }

        if mode != TxMode::Locks {
            let watermark = inner
                .common
                .watermark_excluding(session.transaction_timestamp(), commit_ts);
            for table in &touched {
                if let Some(store) = db.try_store_of(table) {
                    store.write().finalize(watermark);
                }
            }
        }
        self.end_transaction(&mut inner, db, session);
        Ok(())
    }

    /// Reverses the whole row-action log, newest first, then releases
    /// locks and wakes waiters. Infallible by design: a rollback has
    /// nowhere to escalate to.
    pub(crate) fn rollback(&self, db: &Database, session: &Session) {
        if !session.in_transaction() {
            session.reset_statement_state();
            return;
        }
        let mut inner = self.inner.write();
        let actions: Vec<RowAction> = session.actions.lock().drain_reverse_from(0);
        undo_actions(db, &actions);
        self.end_transaction(&mut inner, db, session);
    }

    /// Reverses the actions recorded at or after `start_index`; the
    /// savepoint and statement-abort paths share this.
    pub(crate) fn rollback_partial(
        &self,
        db: &Database,
        session: &Session,
        start_index: usize,
        _timestamp: TxTimestamp,
    ) -> Result<()> {
        let actions: Vec<RowAction> = session.actions.lock().drain_reverse_from(start_index);
        undo_actions(db, &actions);
        Ok(())
    }

    /// Parks `session` until `holder`'s transaction ends; the MVCC row
    /// conflict path uses this when a row's newest version is held
    /// uncommitted by another session. Aborts with a serialization
    /// failure when waiting would close a cycle.
    pub(crate) fn wait_for_session(&self, db: &Database, session: &Session, holder: SessionId) -> Result<()> {
        loop {
            let parked = {
                let _inner = self.inner.write();
                let still_running = db.session(holder).is_some_and(|h| h.in_transaction());
                if !still_running {
                    false
                } else {
                    let waited: HashSet<SessionId> = [holder].into_iter().collect();
                    if !check_deadlock(db, session.id, &waited) {
                        session.abort_transaction.store(true, Ordering::SeqCst);
                        true
                    } else {
                        register_waits(db, session, &waited);
                        session.latch.set(1);
                        true
                    }
                }
            };
            if !parked {
                return Ok(());
            }
            if session.abort_transaction.load(Ordering::SeqCst) {
                self.rollback(db, session);
                return Err(TxError::SerializationFailure.into());
            }
            let timeout = match session.current_timeout.load(Ordering::SeqCst) {
                t if t > 0 => Some(Duration::from_secs(t as u64)),
                _ => None,
            };
            let reached_zero = session.latch.wait(timeout);
            {
                let _inner = self.inner.write();
                clear_waits(db, session);
            }
            if session.abort_action.swap(false, Ordering::SeqCst) || !reached_zero {
                if db.config().tx_interrupt_rollback {
                    self.rollback(db, session);
                } else {
                    session.reset_statement_state();
                }
                return Err(TxError::StatementAborted.into());
            }
        }
    }

    fn end_transaction(&self, inner: &mut ManagerInner, db: &Database, session: &Session) {
        inner.common.locks.unlock_all(session.id);
        if inner.catalog_write_session == Some(session.id) {
            inner.catalog_write_session = None;
            inner.locked_mode = false;
        }
        inner.common.remove_live(session.transaction_timestamp());
        session.reset_transaction_state();
        session.reset_statement_state();
        *session.wait_context.lock() = None;

        let waiters: Vec<SessionId> = session.waited_by.lock().drain().collect();
        for waiter in waiters {
            if let Some(ws) = db.session(waiter) {
                ws.waiting_on.lock().remove(&session.id);
                ws.latch.count_down();
            }
        }
    }
}

/// Whether granting `session` its waited set keeps the wait graph
/// acyclic. Walks `waiting_on` edges depth first; finding a path back
/// to `session` means the grant would deadlock. Bounded by the number
/// of sessions.
fn check_deadlock(db: &Database, session: SessionId, new_waits: &HashSet<SessionId>) -> bool {
    let mut visited = HashSet::new();
    let mut frontier: Vec<SessionId> = new_waits.iter().copied().collect();
    while let Some(current) = frontier.pop() {
        if current == session {
            return false;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(s) = db.session(current) {
            frontier.extend(s.waiting_on.lock().iter().copied());
        }
    }
    true
}

fn register_waits(db: &Database, session: &Session, waited: &HashSet<SessionId>) {
    for waited_id in waited {
        if let Some(ws) = db.session(*waited_id) {
            ws.waited_by.lock().insert(session.id);
        }
    }
    *session.waiting_on.lock() = waited.clone();
}

fn clear_waits(db: &Database, session: &Session) {
    let waited: Vec<SessionId> = session.waiting_on.lock().drain().collect();
    for waited_id in waited {
        if let Some(ws) = db.session(waited_id) {
            ws.waited_by.lock().remove(&session.id);
        }
    }
}

/// After `releaser` gave up some locks mid-transaction, re-evaluates
/// every session queued behind it and releases the ones it no longer
/// blocks.
fn requeue_waiters(inner: &mut ManagerInner, db: &Database, releaser: &Session) {
    let waiters: Vec<SessionId> = releaser.waited_by.lock().iter().copied().collect();
    for waiter_id in waiters {
        let Some(waiter) = db.session(waiter_id) else { continue };
        let ctx = waiter.wait_context.lock().clone();
        let Some(ctx) = ctx else { continue };
        let waited = inner.common.locks.waited_sessions(
            waiter_id,
            &ctx.write_set,
            &ctx.read_set,
            ctx.catalog_lock,
            &db.transacting_sessions(),
        );
        if !waited.contains(&releaser.id) {
            releaser.waited_by.lock().remove(&waiter_id);
            waiter.waiting_on.lock().remove(&releaser.id);
            waiter.latch.count_down();
        }
    }
}

/// Folds each insert/delete pair the same transaction performed on one
/// row: the insert is logically erased and the delete becomes
/// `INSERT_DELETE`, so commit removes the row outright and no version
/// survives.
fn fold_insert_delete(log: &mut crate::db::store::RowActionLog) {
    use crate::db::names::QName;
    use quartzdb_primitives::RowId;
    use std::collections::HashMap;
    let mut pending_inserts: HashMap<(QName, RowId), usize> = HashMap::new();
    for i in 0..log.len() {
        let (kind, row_id, table) = {
            let action = log.get(i).unwrap();
            (action.kind, action.row_id, action.table.clone())
        };
        match kind {
            ActionKind::Insert => {
                pending_inserts.insert((table, row_id), i);
            }
            ActionKind::Delete => {
                if let Some(insert_pos) = pending_inserts.remove(&(table, row_id)) {
                    log.get_mut(insert_pos).unwrap().kind = ActionKind::None;
                    log.get_mut(i).unwrap().kind = ActionKind::InsertDelete;
                }
            }
            _ => {}
        }
    }
}

fn undo_actions(db: &Database, actions: &[RowAction]) {
    for action in actions {
        if action.kind == ActionKind::None {
            continue;
        }
        if let Some(store) = db.try_store_of(&action.table) {
            if let Err(e) = store.write().rollback_row(action) {
                log::error!("rollback of {} row {} failed: {e}", action.table, action.row_id);
            }
        }
    }
}
