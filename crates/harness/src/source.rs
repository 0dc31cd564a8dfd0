use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use rewind_core::{doc, CollectionId, Document, Namespace, OplogEntry, RecordId, Value};
use rewind_engine::{
    CollectionCopy, OplogInterface, OplogSnapshot, RollbackSource, SourceError,
};

/// Scriptable sync source. Everything it is asked is recorded so tests can
/// assert on what rollback fetched.
pub struct MockSource {
    oplog: OplogSnapshot,
    host: String,
    rbid: i32,
    rbid_after_collection_info: Option<i32>,
    rbid_after_searches: Option<(usize, i32)>,
    rbid_after_reads: Option<(usize, i32)>,
    rbid_reads: Cell<usize>,
    rbid_fails: bool,
    documents: BTreeMap<(CollectionId, Value), Document>,
    namespaces: BTreeMap<CollectionId, Namespace>,
    collection_infos: BTreeMap<CollectionId, Option<Document>>,
    copies: BTreeMap<Namespace, CollectionCopy>,

    pub searched_ids: RefCell<Vec<Value>>,
    pub collection_info_calls: Cell<usize>,
    pub copied: RefCell<Vec<Namespace>>,
}

impl MockSource {
    /// `entries` is the remote oplog, newest first.
    pub fn new(entries: Vec<(OplogEntry, RecordId)>) -> Self {
        Self {
            oplog: OplogSnapshot::new("remote oplog", entries),
            host: "mock:27017".to_string(),
            rbid: 0,
            rbid_after_collection_info: None,
            rbid_after_searches: None,
            rbid_after_reads: None,
            rbid_reads: Cell::new(0),
            rbid_fails: false,
            documents: BTreeMap::new(),
            namespaces: BTreeMap::new(),
            collection_infos: BTreeMap::new(),
            copies: BTreeMap::new(),
            searched_ids: RefCell::new(Vec::new()),
            collection_info_calls: Cell::new(0),
            copied: RefCell::new(Vec::new()),
        }
    }

    pub fn with_rollback_id(mut self, rbid: i32) -> Self {
        self.rbid = rbid;
        self
    }

    /// Simulates the source rolling back as soon as collection metadata has
    /// been read from it.
    pub fn with_rollback_id_after_collection_info(mut self, rbid: i32) -> Self {
        self.rbid_after_collection_info = Some(rbid);
        self
    }

    /// Simulates the source rolling back once `searches` documents have
    /// been looked up on it.
    pub fn with_rollback_id_after_searches(mut self, searches: usize, rbid: i32) -> Self {
        self.rbid_after_searches = Some((searches, rbid));
        self
    }

    /// Simulates the source rolling back once its rollback id has been
    /// read `reads` times.
    pub fn with_rollback_id_after_reads(mut self, reads: usize, rbid: i32) -> Self {
        self.rbid_after_reads = Some((reads, rbid));
        self
    }

    pub fn with_failing_rollback_id(mut self) -> Self {
        self.rbid_fails = true;
        self
    }

    /// `doc` must carry its `_id`.
    pub fn with_document(mut self, uuid: CollectionId, doc: Document) -> Self {
        let id = doc.get("_id").cloned().unwrap_or(Value::Null);
        self.documents.insert((uuid, id), doc);
        self
    }

    /// Namespace reported alongside lookups by `uuid`.
    pub fn with_namespace(mut self, uuid: CollectionId, ns: Namespace) -> Self {
        self.namespaces.insert(uuid, ns);
        self
    }

    /// `None` makes the collection unknown to the source.
    pub fn with_collection_info(mut self, uuid: CollectionId, info: Option<Document>) -> Self {
        self.collection_infos.insert(uuid, info);
        self
    }

    pub fn with_copy(mut self, ns: Namespace, copy: CollectionCopy) -> Self {
        self.copies.insert(ns, copy);
        self
    }

    pub fn searched_ids(&self) -> Vec<Value> {
        self.searched_ids.borrow().clone()
    }
}

impl RollbackSource for MockSource {
    fn rollback_id(&self) -> Result<i32, SourceError> {
        if self.rbid_fails {
            return Err(SourceError::OperationFailed("getRollbackId() failed".to_string()));
        }
        let reads = self.rbid_reads.get();
        self.rbid_reads.set(reads + 1);
        if let Some((after, rbid)) = self.rbid_after_reads {
            if reads >= after {
                return Ok(rbid);
            }
        }
        if let Some((searches, rbid)) = self.rbid_after_searches {
            if self.searched_ids.borrow().len() >= searches {
                return Ok(rbid);
            }
        }
        match self.rbid_after_collection_info {
            Some(rbid) if self.collection_info_calls.get() > 0 => Ok(rbid),
            _ => Ok(self.rbid),
        }
    }

    fn oplog(&self) -> &dyn OplogInterface {
        &self.oplog
    }

    fn source(&self) -> &str {
        &self.host
    }

    fn last_operation(&self) -> Result<Option<OplogEntry>, SourceError> {
        match self.oplog.iter().next() {
            Some(item) => Ok(Some(item?.0)),
            None => Ok(None),
        }
    }

    fn find_one(&self, _ns: &Namespace, _filter: &Document) -> Result<Option<Document>, SourceError> {
        Ok(None)
    }

    fn find_one_by_uuid(
        &self,
        _db: &str,
        uuid: CollectionId,
        filter: &Document,
    ) -> Result<(Option<Document>, Option<Namespace>), SourceError> {
        let id = filter
            .get("_id")
            .cloned()
            .ok_or_else(|| SourceError::OperationFailed(format!("filter without _id: {filter}")))?;
        self.searched_ids.borrow_mut().push(id.clone());
        Ok((
            self.documents.get(&(uuid, id)).cloned(),
            self.namespaces.get(&uuid).cloned(),
        ))
    }

    fn copy_collection(&self, ns: &Namespace) -> Result<CollectionCopy, SourceError> {
        self.copied.borrow_mut().push(ns.clone());
        Ok(self.copies.get(ns).cloned().unwrap_or_default())
    }

    fn collection_info_by_uuid(
        &self,
        _db: &str,
        uuid: CollectionId,
    ) -> Result<Option<Document>, SourceError> {
        self.collection_info_calls
            .set(self.collection_info_calls.get() + 1);
        Ok(self.collection_infos.get(&uuid).cloned().unwrap_or_else(|| {
            Some(doc! { "options" => doc! {}, "info" => doc! { "uuid" => uuid } })
        }))
    }

    fn collection_info(&self, ns: &Namespace) -> Result<Option<Document>, SourceError> {
        Ok(Some(doc! { "name" => ns.to_string(), "options" => doc! {} }))
    }
}
