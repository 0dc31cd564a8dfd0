use rewind_core::{doc, CollectionId, Document, Namespace, OpTime, OplogEntry, RecordId};
use rewind_engine::OplogSnapshot;
use rewind_storage::{SqliteStorage, Storage, StorageError};
use tempfile::TempDir;

/// A node's local storage, with helpers for staging pre-rollback state.
pub struct TestNode {
    pub storage: SqliteStorage,
    _dir: Option<TempDir>,
}

impl TestNode {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            storage: SqliteStorage::open_in_memory()?,
            _dir: None,
        })
    }

    /// Backs the node with a database file in a fresh temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("node.db");
        let storage = SqliteStorage::open(path.to_str().ok_or("temp path is not utf-8")?)?;
        Ok(Self {
            storage,
            _dir: Some(dir),
        })
    }

    pub fn create_collection(&mut self, ns: &str) -> Result<CollectionId, Box<dyn std::error::Error>> {
        self.create_collection_with(ns, doc! {})
    }

    pub fn create_collection_with(
        &mut self,
        ns: &str,
        options: Document,
    ) -> Result<CollectionId, Box<dyn std::error::Error>> {
        let uuid = CollectionId::new();
        self.storage
            .create_collection(uuid, &Namespace::parse(ns)?, &options)?;
        Ok(uuid)
    }

    /// Creates a collection already parked under the drop-pending name of
    /// `ns` for `drop_optime`, registered with the reaper.
    pub fn create_drop_pending(
        &mut self,
        ns: &str,
        drop_optime: OpTime,
    ) -> Result<(CollectionId, Namespace), Box<dyn std::error::Error>> {
        let pending = Namespace::parse(ns)?.make_drop_pending(drop_optime);
        let uuid = CollectionId::new();
        self.storage.create_collection(uuid, &pending, &doc! {})?;
        self.storage.add_drop_pending(drop_optime, &pending)?;
        Ok((uuid, pending))
    }

    pub fn create_index(
        &mut self,
        uuid: CollectionId,
        key: Document,
        name: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let ns = self.namespace_of(uuid)?;
        self.storage.create_index(
            uuid,
            &doc! { "ns" => ns.to_string(), "v" => 2, "key" => key, "name" => name },
        )?;
        Ok(())
    }

    pub fn insert(&mut self, uuid: CollectionId, doc: Document) -> Result<(), StorageError> {
        self.storage.upsert_document(uuid, &doc)
    }

    pub fn index_count(&self, uuid: CollectionId) -> Result<usize, StorageError> {
        Ok(self.storage.list_indexes(uuid)?.len())
    }

    pub fn index_spec(&self, uuid: CollectionId, name: &str) -> Result<Option<Document>, StorageError> {
        Ok(self
            .storage
            .list_indexes(uuid)?
            .into_iter()
            .find(|index| index.name == name)
            .map(|index| index.spec))
    }

    pub fn namespace_of(&self, uuid: CollectionId) -> Result<Namespace, StorageError> {
        self.storage
            .collection_by_uuid(uuid)?
            .map(|coll| coll.ns)
            .ok_or_else(|| StorageError::NotFound(format!("collection {uuid}")))
    }

    /// The collection currently holding `ns`, if any.
    pub fn uuid_at(&self, ns: &str) -> Result<Option<CollectionId>, Box<dyn std::error::Error>> {
        Ok(self
            .storage
            .collection_by_namespace(&Namespace::parse(ns)?)?
            .map(|coll| coll.uuid))
    }

    pub fn exists(&self, ns: &Namespace) -> Result<bool, StorageError> {
        Ok(self.storage.collection_by_namespace(ns)?.is_some())
    }

    /// Appends entries, given oldest first, to the node's own oplog.
    pub fn append_oplog(&mut self, entries: &[OplogEntry]) -> Result<Vec<RecordId>, StorageError> {
        entries
            .iter()
            .map(|entry| self.storage.append_oplog(entry))
            .collect()
    }

    pub fn local_oplog(&self) -> Result<OplogSnapshot, StorageError> {
        OplogSnapshot::from_storage(&self.storage)
    }
}
