//! QuartzDB's transactional storage kernel: multi-session transaction
//! management in three concurrency-control modes, per-session row
//! action logs, hybrid memory/disk row stores, a schema catalog with a
//! reference graph, and a grantee rights model.
//!
//! The SQL front end, wire protocol and on-disk page formats live
//! outside this crate; they reach the kernel through [`Session`],
//! [`Statement`] descriptors and the collaborator traits in
//! [`db::log`] and [`db::store`].

pub mod config;
pub mod db;
pub mod error;
pub mod session;

pub use config::DatabaseConfig;
pub use db::database::{Database, DEFAULT_ADMIN_USER};
pub use error::{DbError, ErrorCode, Result};
pub use session::{ResetMode, Session, Statement, StatementOutcome};

pub use quartzdb_primitives::{ColSet, IsolationLevel, ObjectKind, Privilege, PrivilegeSet, RowId, SessionId, TxMode};
pub use db::catalog::ColumnDef;
pub use db::names::QName;
pub use db::store::{Row, Value};
