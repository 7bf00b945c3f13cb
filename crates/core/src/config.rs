use quartzdb_primitives::{IsolationLevel, TxMode};
use std::time::Duration;

/// Knobs handed to [`crate::Database::open`]. Plain values; parsing
/// connection properties into these is a front-end concern.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Initial concurrency-control mode; switchable at runtime while at
    /// most one transaction is live.
    pub tx_mode: TxMode,
    pub default_isolation: IsolationLevel,
    /// Rows a table keeps in memory before its store is promoted to
    /// the disk-backed cache.
    pub max_memory_row_count: usize,
    /// Under MVCC, abort immediately on a write-write conflict instead
    /// of waiting for the holder to finish.
    pub tx_conflict_rollback: bool,
    /// Roll back the whole transaction when a waiting thread is
    /// interrupted; otherwise the interrupt is swallowed and the wait
    /// continues.
    pub tx_interrupt_rollback: bool,
    /// Granularity of the statement-timeout poller.
    pub timeout_tick: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            tx_mode: TxMode::Locks,
            default_isolation: IsolationLevel::ReadCommitted,
            max_memory_row_count: 100_000,
            tx_conflict_rollback: false,
            tx_interrupt_rollback: false,
            timeout_tick: Duration::from_secs(1),
        }
    }
}

impl DatabaseConfig {
    pub fn with_mode(mode: TxMode) -> Self {
        Self {
            tx_mode: mode,
            ..Self::default()
        }
    }
}
