use quartzdb_primitives::{ObjectKind, RowId, SessionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Stable identifiers for the error conditions the kernel emits.
/// Callers that need to branch on a failure should match on
/// [`DbError::code`] rather than on display strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SerializationFailure,
    StatementAborted,
    InvalidTransactionState,
    NotAuthorized,
    GrantInvalid,
    RoleNotGranted,
    ObjectNotFound,
    ObjectReferenced,
    SchemaNotEmpty,
    SchemaNotModifiable,
    ConnectionFailure,
    General,
}

#[derive(Error, Debug)]
pub enum RightsError {
    #[error("access denied on `{0}`")]
    NotAuthorized(String),
    #[error("grantor holds no grantable privilege on `{0}`")]
    GrantInvalid(String),
    #[error("role `{0}` has not been granted")]
    RoleNotGranted(String),
    #[error("grantee `{0}` not found")]
    GranteeNotFound(String),
    #[error("grantee `{0}` already exists")]
    GranteeExists(String),
    #[error("grantee `{0}` is reserved")]
    ReservedGrantee(String),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{kind} `{name}` not found")]
    ObjectNotFound { kind: ObjectKind, name: String },
    #[error("{kind} `{name}` already exists")]
    ObjectExists { kind: ObjectKind, name: String },
    #[error("`{object}` is referenced by `{referrer}`")]
    ObjectReferenced { object: String, referrer: String },
    #[error("schema `{0}` is not empty")]
    SchemaNotEmpty(String),
    #[error("schema `{0}` cannot be modified")]
    SchemaNotModifiable(String),
    #[error("`{object}` cannot be moved out of schema `{schema}`")]
    CrossSchemaRename { object: String, schema: String },
}

#[derive(Error, Debug)]
pub enum TxError {
    #[error("transaction rolled back: serialization failure")]
    SerializationFailure,
    #[error("statement aborted")]
    StatementAborted,
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row {0} not found")]
    RowNotFound(RowId),
    #[error("commit action {0} is illegal for a hybrid store")]
    IllegalCommitAction(&'static str),
    #[error("row {0} missing from the data-file cache")]
    CacheMiss(RowId),
    #[error("unique constraint `{index}` violated on `{table}`")]
    UniqueConstraintViolation { index: String, table: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(SessionId),
    #[error("savepoint `{0}` not declared")]
    SavepointNotFound(String),
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("RightsError: {0}")]
    Rights(#[from] RightsError),
    #[error("CatalogError: {0}")]
    Catalog(#[from] CatalogError),
    #[error("TxError: {0}")]
    Tx(#[from] TxError),
    #[error("StoreError: {0}")]
    Store(#[from] StoreError),
    #[error("SessionError: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DbError::Rights(e) => match e {
                RightsError::NotAuthorized(_) => ErrorCode::NotAuthorized,
                RightsError::GrantInvalid(_) => ErrorCode::GrantInvalid,
                RightsError::RoleNotGranted(_) => ErrorCode::RoleNotGranted,
                RightsError::GranteeNotFound(_) => ErrorCode::ObjectNotFound,
                RightsError::GranteeExists(_) | RightsError::ReservedGrantee(_) => ErrorCode::General,
            },
            DbError::Catalog(e) => match e {
                CatalogError::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
                CatalogError::ObjectReferenced { .. } => ErrorCode::ObjectReferenced,
                CatalogError::SchemaNotEmpty(_) => ErrorCode::SchemaNotEmpty,
                CatalogError::SchemaNotModifiable(_) => ErrorCode::SchemaNotModifiable,
                CatalogError::ObjectExists { .. } | CatalogError::CrossSchemaRename { .. } => ErrorCode::General,
            },
            DbError::Tx(e) => match e {
                TxError::SerializationFailure => ErrorCode::SerializationFailure,
                TxError::StatementAborted => ErrorCode::StatementAborted,
                TxError::InvalidTransactionState(_) => ErrorCode::InvalidTransactionState,
            },
            DbError::Session(e) => match e {
                SessionError::ConnectionFailure(_) => ErrorCode::ConnectionFailure,
                SessionError::Closed(_) | SessionError::SavepointNotFound(_) => ErrorCode::General,
            },
            DbError::Store(_) | DbError::Other(_) => ErrorCode::General,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_the_stable_taxonomy() {
        let err: DbError = TxError::SerializationFailure.into();
        assert_eq!(err.code(), ErrorCode::SerializationFailure);
        let err: DbError = RightsError::RoleNotGranted("R".into()).into();
        assert_eq!(err.code(), ErrorCode::RoleNotGranted);
        let err: DbError = CatalogError::SchemaNotEmpty("S".into()).into();
        assert_eq!(err.code(), ErrorCode::SchemaNotEmpty);
    }
}
