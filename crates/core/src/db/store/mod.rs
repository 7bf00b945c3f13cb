//! Row containers and the per-session row-action log.
//!
//! A table's rows live in a [`HybridRowStore`]: in memory until the
//! configured row count is exceeded, then promoted into a disk-backed
//! cache behind the [`RowCache`] seam. Row mutations never happen in
//! place; every insert and delete is recorded as a [`RowAction`] in the
//! owning session's log and resolved at commit or rollback.

mod action;
mod action_log;
mod cache;
mod hybrid;
mod index;
mod row;

pub use action::{ActionKind, RowAction};
pub use action_log::RowActionLog;
pub use cache::{HashMapRowCache, RowCache};
pub use hybrid::HybridRowStore;
pub use index::BTreeIndex;
pub use row::{Row, RowVersion, Value};
