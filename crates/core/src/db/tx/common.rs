use crate::db::lock::LockTable;
use crate::db::names::QName;
use quartzdb_primitives::{TxMode, TxTimestamp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// State every transaction-manager mode shares and that survives a mode
/// switch: the database-wide change counter, the live-transaction
/// deque, the transaction count and the lock table.
pub(crate) struct TxCommon {
    /// The database-wide change counter. Starts at one; zero stays
    /// reserved for "not committed".
    global_change_timestamp: AtomicU64,
    transaction_count: AtomicU64,
    /// The `transactionTimestamp` of every open transaction, in
    /// ascending order. Timestamps are issued monotonically, so pushes
    /// go at the back and the front is the oldest live transaction.
    pub(crate) live_timestamps: VecDeque<TxTimestamp>,
    pub(crate) locks: LockTable,
}

impl TxCommon {
    pub(crate) fn new() -> Self {
        Self {
            global_change_timestamp: AtomicU64::new(1),
            transaction_count: AtomicU64::new(0),
            live_timestamps: VecDeque::new(),
            locks: LockTable::new(),
        }
    }

    pub(crate) fn next_timestamp(&self) -> TxTimestamp {
        self.global_change_timestamp.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn current_timestamp(&self) -> TxTimestamp {
        self.global_change_timestamp.load(Ordering::SeqCst)
    }

    pub(crate) fn transaction_count(&self) -> u64 {
        self.transaction_count.load(Ordering::SeqCst)
    }

    pub(crate) fn add_live(&mut self, timestamp: TxTimestamp) {
        debug_assert!(
            self.live_timestamps.back().map_or(true, |last| *last < timestamp),
            "live transaction timestamps must stay strictly increasing",
        );
        self.live_timestamps.push_back(timestamp);
        self.transaction_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_live(&mut self, timestamp: TxTimestamp) {
        if let Some(pos) = self.live_timestamps.iter().position(|t| *t == timestamp) {
            self.live_timestamps.remove(pos);
            self.transaction_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// The oldest live transaction timestamp, excluding `not_counting`;
    /// versions whose delete committed at or before this can never be
    /// read again. Falls back to `fallback` when nothing else is live.
    pub(crate) fn watermark_excluding(&self, not_counting: TxTimestamp, fallback: TxTimestamp) -> TxTimestamp {
        self.live_timestamps
            .iter()
            .copied()
            .filter(|t| *t != not_counting)
            .min()
            .unwrap_or(fallback)
    }
}

/// Per-mode behavior knobs consulted by the shared `begin_action` and
/// statement-end paths.
#[derive(Clone, Copy)]
pub(crate) struct ModeTraits {
    /// Whether data statements take table locks at all.
    pub(crate) uses_data_locks: bool,
}

impl ModeTraits {
    pub(crate) fn for_mode(mode: TxMode) -> Self {
        match mode {
            TxMode::Locks | TxMode::MvLocks => Self { uses_data_locks: true },
            TxMode::Mvcc => Self { uses_data_locks: false },
        }
    }
}

/// The record of one parked acquisition attempt, kept so lock releases
/// can recompute the waiter's set without re-parsing its statement.
#[derive(Clone)]
pub(crate) struct WaitContext {
    pub(crate) write_set: Vec<QName>,
    pub(crate) read_set: Vec<QName>,
    pub(crate) catalog_lock: bool,
}
