//! Per-client session state: identity, transaction attributes, the
//! row-action log, savepoints and the wait latch.

mod latch;
mod statement;

pub use statement::{Statement, StatementOutcome};

pub(crate) use latch::Latch;

use crate::db::database::Database;
use crate::db::names::QName;
use crate::db::store::{Row, RowActionLog, Value};
use crate::db::tx::WaitContext;
use crate::error::{Result, SessionError, TxError};
use parking_lot::Mutex;
use quartzdb_primitives::{ColSet, IsolationLevel, RowId, SessionId, TxTimestamp};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A named rollback point: the row-action log length at declaration
/// plus a fresh timestamp.
#[derive(Debug, Clone)]
pub struct Savepoint {
    pub name: Box<str>,
    pub index: usize,
    pub timestamp: TxTimestamp,
}

/// How much of a session another session's reset clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Close open result cursors.
    Results,
    /// Clear statement-local tables.
    Tables,
    /// Results, tables and attributes back to defaults.
    ResetAll,
    /// Force a rollback if a transaction is open.
    Rollback,
    /// Abort the current statement only, matched by its start
    /// timestamp.
    Statement,
    /// Close the session.
    Close,
}

/// One client's connection state. Shared as `Arc<Session>`; every field
/// that moves after construction sits behind an atomic or its own
/// mutex, and the transaction manager is the only writer of the wait
/// machinery.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) random_id: u64,
    pub(crate) db: Weak<Database>,
    zone: Option<Box<str>>,
    user: Mutex<Box<str>>,
    role: Mutex<Option<Box<str>>>,
    schema: Mutex<Box<str>>,
    pub(crate) closed: AtomicBool,

    autocommit: AtomicBool,
    read_only: AtomicBool,
    read_only_default: AtomicBool,
    isolation: Mutex<IsolationLevel>,
    isolation_default: Mutex<IsolationLevel>,
    max_rows: AtomicU32,

    pub(crate) is_transaction: AtomicBool,
    pub(crate) in_statement: AtomicBool,
    pub(crate) transaction_timestamp: AtomicU64,
    pub(crate) action_timestamp: AtomicU64,
    pub(crate) statement_start_timestamp: AtomicU64,
    pub(crate) statement_start_index: AtomicUsize,
    pub(crate) actions: Mutex<RowActionLog>,
    pub(crate) savepoints: Mutex<Vec<Savepoint>>,
    pub(crate) touched_sequences: Mutex<Vec<QName>>,

    pub(crate) waiting_on: Mutex<HashSet<SessionId>>,
    pub(crate) waited_by: Mutex<HashSet<SessionId>>,
    pub(crate) wait_context: Mutex<Option<WaitContext>>,
    pub(crate) latch: Latch,
    pub(crate) abort_action: AtomicBool,
    pub(crate) abort_transaction: AtomicBool,
    pub(crate) tx_conflict: AtomicBool,
    pub(crate) depth: AtomicU32,
    pub(crate) current_timeout: AtomicI64,
}

impl Session {
    pub(crate) fn new(
        db: Weak<Database>,
        id: SessionId,
        user: &str,
        autocommit: bool,
        read_only: bool,
        zone: Option<&str>,
        isolation: IsolationLevel,
        default_schema: &str,
    ) -> Self {
        Self {
            id,
            random_id: rand::random(),
            db,
            zone: zone.map(Into::into),
            user: Mutex::new(user.into()),
            role: Mutex::new(None),
            schema: Mutex::new(default_schema.into()),
            closed: AtomicBool::new(false),
            autocommit: AtomicBool::new(autocommit),
            read_only: AtomicBool::new(read_only),
            read_only_default: AtomicBool::new(read_only),
            isolation: Mutex::new(isolation.normalized()),
            isolation_default: Mutex::new(isolation.normalized()),
            max_rows: AtomicU32::new(0),
            is_transaction: AtomicBool::new(false),
            in_statement: AtomicBool::new(false),
            transaction_timestamp: AtomicU64::new(0),
            action_timestamp: AtomicU64::new(0),
            statement_start_timestamp: AtomicU64::new(0),
            statement_start_index: AtomicUsize::new(0),
            actions: Mutex::new(RowActionLog::new()),
            savepoints: Mutex::new(Vec::new()),
            touched_sequences: Mutex::new(Vec::new()),
            waiting_on: Mutex::new(HashSet::new()),
            waited_by: Mutex::new(HashSet::new()),
            wait_context: Mutex::new(None),
            latch: Latch::new(),
            abort_action: AtomicBool::new(false),
            abort_transaction: AtomicBool::new(false),
            tx_conflict: AtomicBool::new(false),
            depth: AtomicU32::new(0),
            current_timeout: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The value a peer must present to cancel this session's work.
    pub fn random_id(&self) -> u64 {
        self.random_id
    }

    pub fn user(&self) -> String {
        self.user.lock().to_string()
    }

    pub fn current_schema(&self) -> String {
        self.schema.lock().to_string()
    }

    pub fn set_current_schema(&self, schema: &str) {
        *self.schema.lock() = schema.into();
    }

    pub fn current_role(&self) -> Option<String> {
        self.role.lock().as_ref().map(|r| r.to_string())
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_transaction(&self) -> bool {
        self.is_transaction.load(Ordering::SeqCst)
    }

    pub fn transaction_timestamp(&self) -> TxTimestamp {
        self.transaction_timestamp.load(Ordering::SeqCst)
    }

    pub fn statement_start_timestamp(&self) -> TxTimestamp {
        self.statement_start_timestamp.load(Ordering::SeqCst)
    }

    pub fn isolation(&self) -> IsolationLevel {
        *self.isolation.lock()
    }

    /// Sets the isolation for subsequent transactions. Rejected while a
    /// transaction is open; setting the current level again is a no-op.
    pub fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.check_open()?;
        let level = level.normalized();
        if *self.isolation.lock() == level {
            return Ok(());
        }
        if self.in_transaction() {
            return Err(TxError::InvalidTransactionState("isolation change inside a transaction".into()).into());
        }
        *self.isolation.lock() = level;
        *self.isolation_default.lock() = level;
        Ok(())
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit.load(Ordering::SeqCst)
    }

    /// Changing autocommit commits any open transaction first, the way
    /// the SQL session attribute behaves. A no-op at routine depth.
    pub fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.check_open()?;
        if self.depth.load(Ordering::SeqCst) > 0 {
            return Ok(());
        }
        if self.autocommit.swap(autocommit, Ordering::SeqCst) != autocommit && self.in_transaction() {
            self.commit()?;
        }
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.check_open()?;
        if self.in_transaction() {
            return Err(TxError::InvalidTransactionState("read-only change inside a transaction".into()).into());
        }
        self.read_only.store(read_only, Ordering::SeqCst);
        self.read_only_default.store(read_only, Ordering::SeqCst);
        Ok(())
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows.load(Ordering::SeqCst)
    }

    pub fn set_max_rows(&self, max_rows: u32) {
        self.max_rows.store(max_rows, Ordering::SeqCst);
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SessionError::Closed(self.id).into())
        } else {
            Ok(())
        }
    }

    fn database(&self) -> Result<Arc<Database>> {
        self.db
            .upgrade()
            .ok_or_else(|| SessionError::ConnectionFailure("database shut down".into()).into())
    }

    /// Routine reentrance: triggers and UDFs call back into the session
    /// with the depth raised; transaction boundary operations are
    /// no-ops until it drops back to zero.
    pub fn enter_routine(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_routine(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    // ---- statement lifecycle -------------------------------------------------

    /// Declares a statement and waits out or acquires whatever the
    /// current transaction mode requires before it may run.
    pub fn begin_statement(&self, stmt: &Statement) -> Result<()> {
        self.check_open()?;
        let db = self.database()?;
        db.begin_action(self, stmt)
    }

    /// Ends the statement, releasing short read locks and waking
    /// affected waiters. In autocommit mode this commits.
    pub fn end_statement(&self) -> Result<()> {
        self.check_open()?;
        let db = self.database()?;
        db.end_action(self)?;
        if self.is_autocommit() && self.depth.load(Ordering::SeqCst) == 0 {
            self.commit()?;
        }
        Ok(())
    }

    // ---- row operations ------------------------------------------------------

    pub fn insert(&self, table: &str, values: Vec<Value>) -> Result<RowId> {
        self.check_open()?;
        self.database()?.insert_row(self, table, values, None)
    }

    pub fn delete(&self, table: &str, row_id: RowId) -> Result<bool> {
        self.check_open()?;
        self.database()?.delete_row(self, table, row_id, None)
    }

    /// An update is decomposed into a delete and an insert sharing the
    /// changed-column mask.
    pub fn update(&self, table: &str, row_id: RowId, values: Vec<Value>, changed: ColSet) -> Result<RowId> {
        self.check_open()?;
        let db = self.database()?;
        db.delete_row(self, table, row_id, Some(changed.clone()))?;
        db.insert_row(self, table, values, Some(changed))
    }

    /// Every row of the table this session is entitled to see under its
    /// isolation level and the manager's mode.
    pub fn scan(&self, table: &str) -> Result<Vec<Row>> {
        self.check_open()?;
        self.database()?.scan_table(self, table)
    }

    pub fn next_sequence_value(&self, sequence: &str) -> Result<i64> {
        self.check_open()?;
        self.database()?.next_sequence_value(self, sequence)
    }

    // ---- transaction boundaries ----------------------------------------------

    pub fn commit(&self) -> Result<()> {
        self.check_open()?;
        if self.depth.load(Ordering::SeqCst) > 0 {
            return Ok(());
        }
        let db = self.database()?;
        db.commit(self)
    }

    pub fn rollback(&self) -> Result<()> {
        self.check_open()?;
        if self.depth.load(Ordering::SeqCst) > 0 {
            return Ok(());
        }
        let db = self.database()?;
        db.rollback(self);
        Ok(())
    }

    // ---- savepoints ----------------------------------------------------------

    /// Declares (or redeclares) a savepoint at the current row-action
    /// log position.
    pub fn savepoint(&self, name: &str) -> Result<()> {
        self.check_open()?;
        let db = self.database()?;
        let timestamp = db.tx().next_timestamp();
        let index = self.actions.lock().len();
        let mut savepoints = self.savepoints.lock();
        savepoints.retain(|sp| &*sp.name != name);
        savepoints.push(Savepoint {
            name: name.into(),
            index,
            timestamp,
        });
        Ok(())
    }

    /// Reverses every action recorded after the savepoint and drops the
    /// savepoints declared since.
    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.check_open()?;
        let db = self.database()?;
        let (index, timestamp, keep) = {
            let savepoints = self.savepoints.lock();
            let pos = savepoints
                .iter()
                .position(|sp| &*sp.name == name)
                .ok_or_else(|| SessionError::SavepointNotFound(name.into()))?;
            (savepoints[pos].index, savepoints[pos].timestamp, pos + 1)
        };
        db.rollback_partial(self, index, timestamp)?;
        self.savepoints.lock().truncate(keep);
        Ok(())
    }

    /// Forgets the named savepoint and every one declared after it.
    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        self.check_open()?;
        let mut savepoints = self.savepoints.lock();
        let pos = savepoints
            .iter()
            .position(|sp| &*sp.name == name)
            .ok_or_else(|| SessionError::SavepointNotFound(name.into()))?;
        savepoints.truncate(pos);
        Ok(())
    }

    // ---- close ---------------------------------------------------------------

    /// Rolls back any open transaction and marks the session closed.
    /// Idempotent; failures on the way out are absorbed, the session is
    /// closed regardless.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(db) = self.db.upgrade() {
            if self.in_transaction() {
                db.rollback(self);
            }
            db.forget_session(self.id);
        }
    }

    pub(crate) fn reset_statement_state(&self) {
        self.abort_action.store(false, Ordering::SeqCst);
        self.current_timeout.store(0, Ordering::SeqCst);
    }

    pub(crate) fn reset_transaction_state(&self) {
        self.is_transaction.store(false, Ordering::SeqCst);
        self.in_statement.store(false, Ordering::SeqCst);
        self.transaction_timestamp.store(0, Ordering::SeqCst);
        self.abort_action.store(false, Ordering::SeqCst);
        self.abort_transaction.store(false, Ordering::SeqCst);
        self.tx_conflict.store(false, Ordering::SeqCst);
        self.actions.lock().clear();
        self.savepoints.lock().clear();
        self.touched_sequences.lock().clear();
        let default_read_only = self.read_only_default.load(Ordering::SeqCst);
        self.read_only.store(default_read_only, Ordering::SeqCst);
        *self.isolation.lock() = *self.isolation_default.lock();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.is_closed() {
            log::warn!("session {} dropped without close", self.id);
        }
    }
}
