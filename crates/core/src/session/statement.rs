use crate::db::names::QName;
use smallvec::SmallVec;

/// What the kernel sees of a compiled statement: the declared table
/// read and write sets the lock table plans against, the catalog-lock
/// flag for DDL, and the statement timeout.
#[derive(Clone)]
pub struct Statement {
    pub read_set: SmallVec<[QName; 2]>,
    pub write_set: SmallVec<[QName; 2]>,
    pub is_catalog_change: bool,
    pub timeout_secs: u32,
}

impl Statement {
    pub fn reading(names: &[QName]) -> Self {
        Self {
            read_set: names.iter().cloned().collect(),
            write_set: SmallVec::new(),
            is_catalog_change: false,
            timeout_secs: 0,
        }
    }

    pub fn writing(names: &[QName]) -> Self {
        Self {
            read_set: SmallVec::new(),
            write_set: names.iter().cloned().collect(),
            is_catalog_change: false,
            timeout_secs: 0,
        }
    }

    pub fn reading_writing(read: &[QName], write: &[QName]) -> Self {
        Self {
            read_set: read.iter().cloned().collect(),
            write_set: write.iter().cloned().collect(),
            is_catalog_change: false,
            timeout_secs: 0,
        }
    }

    /// A DDL statement: holds the catalog lock, waiting out every other
    /// transacting session.
    pub fn ddl() -> Self {
        Self {
            read_set: SmallVec::new(),
            write_set: SmallVec::new(),
            is_catalog_change: true,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// What executing a statement produced.
#[derive(Debug)]
pub enum StatementOutcome {
    UpdateCount(usize),
    Rows(Vec<crate::db::store::Row>),
}
