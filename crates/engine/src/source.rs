use rewind_core::{CollectionId, CoreError, Document, Namespace, OplogEntry};
use thiserror::Error;

use crate::oplog::OplogInterface;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sync source unreachable: {0}")]
    Unreachable(String),

    #[error("operation failed on sync source: {0}")]
    OperationFailed(String),

    #[error("oplog read failed: {0}")]
    Oplog(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Everything needed to recreate a collection wholesale from the sync source.
#[derive(Debug, Clone, Default)]
pub struct CollectionCopy {
    pub options: Document,
    pub indexes: Vec<Document>,
    pub documents: Vec<Document>,
}

/// The sync source, as seen by rollback.
///
/// Collection info documents follow the `listCollections` shape: an
/// `options` field holding the collection options object, when present.
pub trait RollbackSource {
    /// The sync source's rollback id. It changes whenever the source
    /// itself rolls back.
    fn rollback_id(&self) -> Result<i32, SourceError>;

    fn oplog(&self) -> &dyn OplogInterface;

    /// Host description, for logging.
    fn source(&self) -> &str;

    fn last_operation(&self) -> Result<Option<OplogEntry>, SourceError>;

    fn find_one(&self, ns: &Namespace, filter: &Document) -> Result<Option<Document>, SourceError>;

    /// Looks a document up by collection id. Also reports the namespace the
    /// source currently holds that collection under, if it has it.
    fn find_one_by_uuid(
        &self,
        db: &str,
        uuid: CollectionId,
        filter: &Document,
    ) -> Result<(Option<Document>, Option<Namespace>), SourceError>;

    fn copy_collection(&self, ns: &Namespace) -> Result<CollectionCopy, SourceError>;

    fn collection_info_by_uuid(
        &self,
        db: &str,
        uuid: CollectionId,
    ) -> Result<Option<Document>, SourceError>;

    fn collection_info(&self, ns: &Namespace) -> Result<Option<Document>, SourceError>;
}
