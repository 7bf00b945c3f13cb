//! The durability escape hatch. The kernel's in-memory state is
//! authoritative; the commit log is an append-only collaborator whose
//! failures are warned about, never fatal to a commit.

use crate::db::names::QName;
use crate::db::store::Row;
use parking_lot::Mutex;
use quartzdb_primitives::{SessionId, TxTimestamp};

pub type LogResult = std::result::Result<(), anyhow::Error>;

/// What the transaction manager tells the log. Object-safe; the
/// database holds it as `Arc<dyn CommitLog>`.
pub trait CommitLog: Send + Sync {
    /// Appends a commit marker for the session's transaction.
    fn write_commit(&self, session: SessionId, commit_ts: TxTimestamp) -> LogResult;

    /// Records the allocation watermark of a sequence the transaction
    /// consumed values from.
    fn write_sequence(&self, session: SessionId, sequence: &QName) -> LogResult;

    /// Statement-level event logging, for the SQL log channel.
    fn log_statement(&self, session: SessionId, statement: &str, ok: bool);

    /// Whether enough has been appended that the engine should fold the
    /// log into a checkpoint.
    fn needs_checkpoint_reset(&self) -> bool;
}

/// The default log: everything is dropped on the floor. In-memory
/// databases run with this.
pub struct NoopLog;

impl CommitLog for NoopLog {
    fn write_commit(&self, _session: SessionId, _commit_ts: TxTimestamp) -> LogResult {
        Ok(())
    }

    fn write_sequence(&self, _session: SessionId, _sequence: &QName) -> LogResult {
        Ok(())
    }

    fn log_statement(&self, _session: SessionId, _statement: &str, _ok: bool) {}

    fn needs_checkpoint_reset(&self) -> bool {
        false
    }
}

/// A log that remembers what was appended; tests assert against it.
#[derive(Default)]
pub struct RecordingLog {
    pub events: Mutex<Vec<LogEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Commit { session: SessionId, commit_ts: TxTimestamp },
    Sequence { session: SessionId, sequence: String },
    Statement { session: SessionId, ok: bool },
}

impl CommitLog for RecordingLog {
    fn write_commit(&self, session: SessionId, commit_ts: TxTimestamp) -> LogResult {
        self.events.lock().push(LogEvent::Commit { session, commit_ts });
        Ok(())
    }

    fn write_sequence(&self, session: SessionId, sequence: &QName) -> LogResult {
        self.events.lock().push(LogEvent::Sequence {
            session,
            sequence: sequence.qualified(),
        });
        Ok(())
    }

    fn log_statement(&self, session: SessionId, _statement: &str, ok: bool) {
        self.events.lock().push(LogEvent::Statement { session, ok });
    }

    fn needs_checkpoint_reset(&self) -> bool {
        false
    }
}

/// Reference counting for out-of-row LOB storage. The byte store
/// itself is outside the kernel; commits report which LOB-bearing
/// values appeared or disappeared.
pub trait LobTracker: Send + Sync {
    fn adjust(&self, table: &QName, row: &Row, col: u16, delta: i32);
}

pub struct NoopLobTracker;

impl LobTracker for NoopLobTracker {
    fn adjust(&self, _table: &QName, _row: &Row, _col: u16, _delta: i32) {}
}
