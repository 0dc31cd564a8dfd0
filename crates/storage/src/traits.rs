use rewind_core::{CollectionId, Document, Namespace, OpTime, OplogEntry, RecordId, Value};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub uuid: CollectionId,
    pub ns: Namespace,
    pub options: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub name: String,
    pub spec: Document,
}

/// A collection parked under a drop-pending name, awaiting the reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct DropPendingRecord {
    pub ns: Namespace,
    pub drop_optime: OpTime,
}

/// Name of the index every collection carries on `_id`.
pub const ID_INDEX_NAME: &str = "_id_";

/// Local storage capability used by rollback. Every method is atomic:
/// it either applies fully or leaves storage untouched.
pub trait Storage {
    // Catalog

    /// Creates a collection together with its `_id_` index.
    fn create_collection(
        &mut self,
        uuid: CollectionId,
        ns: &Namespace,
        options: &Document,
    ) -> Result<(), StorageError>;

    /// Destroys a collection with its indexes and documents.
    fn drop_collection(&mut self, uuid: CollectionId) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NamespaceExists`] when `to` is taken.
    fn rename_collection(&mut self, uuid: CollectionId, to: &Namespace) -> Result<(), StorageError>;

    fn set_collection_options(
        &mut self,
        uuid: CollectionId,
        options: &Document,
    ) -> Result<(), StorageError>;

    fn collection_by_uuid(&self, uuid: CollectionId) -> Result<Option<CollectionRecord>, StorageError>;

    fn collection_by_namespace(&self, ns: &Namespace) -> Result<Option<CollectionRecord>, StorageError>;


    // Indexes

    /// The index name is taken from the spec's `name` field.
    fn create_index(&mut self, uuid: CollectionId, spec: &Document) -> Result<(), StorageError>;

    fn drop_index(&mut self, uuid: CollectionId, name: &str) -> Result<(), StorageError>;

    fn list_indexes(&self, uuid: CollectionId) -> Result<Vec<IndexRecord>, StorageError>;

    // Documents

    /// Inserts or overwrites the document keyed by its `_id`.
    fn upsert_document(&mut self, uuid: CollectionId, doc: &Document) -> Result<(), StorageError>;

    /// Returns whether a document was removed.
    fn delete_document(&mut self, uuid: CollectionId, id: &Value) -> Result<bool, StorageError>;

    fn find_document(&self, uuid: CollectionId, id: &Value) -> Result<Option<Document>, StorageError>;

    fn document_count(&self, uuid: CollectionId) -> Result<u64, StorageError>;

    // Operation log

    fn append_oplog(&mut self, entry: &OplogEntry) -> Result<RecordId, StorageError>;

    fn oplog_newest_first(&self) -> Result<Vec<(OplogEntry, RecordId)>, StorageError>;

    /// Deletes every entry stored after `record_id`; returns how many.
    fn truncate_oplog_after(&mut self, record_id: RecordId) -> Result<u64, StorageError>;

    // Drop-pending registry

    fn add_drop_pending(&mut self, drop_optime: OpTime, ns: &Namespace) -> Result<(), StorageError>;

    /// Renames a collection to its drop-pending name `to` and registers it
    /// with the reaper as one write.
    fn set_aside_collection(
        &mut self,
        uuid: CollectionId,
        to: &Namespace,
        drop_optime: OpTime,
    ) -> Result<(), StorageError>;

    fn remove_drop_pending(&mut self, ns: &Namespace) -> Result<bool, StorageError>;

    fn list_drop_pending(&self) -> Result<Vec<DropPendingRecord>, StorageError>;

    /// Permanently drops every registered collection whose drop op-time is
    /// at or before `op_time`. Returns the reclaimed namespaces.
    fn reap_drop_pending_through(&mut self, op_time: OpTime) -> Result<Vec<Namespace>, StorageError>;

    // Consistency markers

    fn min_valid(&self) -> Result<Option<OpTime>, StorageError>;

    fn set_min_valid(&mut self, op_time: OpTime) -> Result<(), StorageError>;

    fn applied_through(&self) -> Result<Option<OpTime>, StorageError>;

    fn set_applied_through(&mut self, op_time: OpTime) -> Result<(), StorageError>;

    fn rollback_id(&self) -> Result<i32, StorageError>;

    /// Bumps the local rollback id and returns the new value.
    fn increment_rollback_id(&mut self) -> Result<i32, StorageError>;
}
