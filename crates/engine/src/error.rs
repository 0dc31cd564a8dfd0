use rewind_core::{CollectionId, CoreError, Namespace};
use rewind_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::source::SourceError;

/// Rollback cannot safely continue. Either the local log is malformed or
/// the node's data may already disagree with the sync source.
#[derive(Debug, Error)]
pub enum RollbackFatal {
    #[error("local op on rollback has no ns: {0}")]
    MissingNamespace(String),

    #[error("local op on rollback has no object field: {0}")]
    MissingObject(String),

    #[error("local update op on rollback has no o2 field: {0}")]
    MissingObject2(String),

    #[error("local op on rollback has no collection uuid: {0}")]
    MissingCollectionId(String),

    #[error("cannot roll back op with no _id. ns: {ns}, document: {doc}")]
    MissingDocumentId { ns: String, doc: String },

    #[error("local op has txnNumber but no {missing}: {entry}")]
    IncompleteSessionInfo { missing: &'static str, entry: String },

    #[error("local op has session info but no txnNumber: {0}")]
    SessionWithoutTxnNumber(String),

    #[error("transaction table uuid is unknown, cannot roll back transactional op: {0}")]
    MissingTransactionTable(String),

    #[error("missing index name in createIndexes operation on rollback: {0}")]
    MissingIndexName(String),

    #[error("missing index spec in dropIndexes operation on rollback: {0}")]
    MissingIndexSpec(String),

    #[error("can't rollback this command yet: {0}")]
    UnsupportedCommand(String),

    #[error("malformed command on rollback: {0}")]
    MalformedCommand(String),

    #[error("fix-up plan has no common point")]
    MissingCommonPoint,

    #[error("rollback id on sync source changed during rollback: expected {expected}, found {actual}")]
    EpochChanged { expected: i32, actual: i32 },

    #[error("Failed to parse options {options}: {reason}")]
    BadCollectionOptions { options: String, reason: String },

    #[error("transaction table document refetched from {actual}, expected {expected}")]
    TransactionTableMoved { expected: Namespace, actual: String },

    #[error("cannot move collection {uuid} to {target}: namespace occupied")]
    NamespaceOccupied { uuid: CollectionId, target: Namespace },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid local catalog entry: {0}")]
    Catalog(#[from] CoreError),

    #[error("storage error during rollback: {0}")]
    Storage(#[from] StorageError),

    #[error("sync source error during rollback: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("OplogStartMissing: {0}")]
    OplogStartMissing(String),

    #[error("UnrecoverableRollbackError: {0}")]
    Unrecoverable(String),

    #[error("sync source rolled back: required rollback id {required}, found {actual}")]
    UpstreamRolledBack { required: i32, actual: i32 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sync source error: {0}")]
    Source(#[from] SourceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RollbackError {
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// How a rollback attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Success,
    /// Nothing was changed; try again after a delay.
    RetryLater { reason: String },
    /// Local data may be inconsistent; the process must stop.
    Unrecoverable { reason: String },
}

impl From<&Result<(), RollbackError>> for RollbackOutcome {
    fn from(result: &Result<(), RollbackError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) if e.is_unrecoverable() => Self::Unrecoverable {
                reason: e.to_string(),
            },
            Err(e) => Self::RetryLater {
                reason: e.to_string(),
            },
        }
    }
}
