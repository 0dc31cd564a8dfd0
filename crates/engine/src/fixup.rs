//! The fix-up plan: every correction rollback must make, accumulated by
//! folding the divergent local oplog tail newest-to-oldest.
//!
//! An action recorded for a key is only final once the whole tail has been
//! folded, since an older entry for the same key may cancel or reshape it.

use std::collections::{BTreeMap, BTreeSet};

use rewind_core::{
    Command, CollectionId, CoreError, Document, Namespace, OpTime, OpType, OplogEntry, Value,
};

use crate::common_point::CommonPoint;
use crate::error::RollbackFatal;

/// A document to refetch from the sync source: collection id plus `_id`.
///
/// Ordered by collection first, so every document of one collection sits in
/// the contiguous range `min_for(uuid)..=max_for(uuid)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DocId {
    pub uuid: CollectionId,
    pub id: Value,
}

impl DocId {
    pub fn new(uuid: CollectionId, id: impl Into<Value>) -> Self {
        Self {
            uuid,
            id: id.into(),
        }
    }

    /// Sorts before every real document of `uuid`.
    pub fn min_for(uuid: CollectionId) -> Self {
        Self::new(uuid, Value::MinKey)
    }

    /// Sorts after every real document of `uuid`.
    pub fn max_for(uuid: CollectionId) -> Self {
        Self::new(uuid, Value::MaxKey)
    }
}

/// Structural correction for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionFix {
    /// Created in the divergent tail; set it aside under a drop-pending name.
    Drop,
    /// Renamed in the divergent tail; move it back to `target`.
    Rename { current: Namespace, target: Namespace },
    /// Dropped in the divergent tail; bring it back from its drop-pending
    /// name (or from the sync source) under `target`.
    Restore {
        drop_optime: OpTime,
        dropped_ns: Namespace,
        target: Namespace,
    },
}

/// Net index correction for one (collection, index name).
///
/// A key with no entry is the absent state: nothing to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexAction {
    /// The index was created in the divergent tail. `local` is its spec.
    Drop { local: Document },
    /// The index was dropped in the divergent tail; recreate it from `spec`.
    Create { spec: Document },
    /// The name was dropped and later recreated with a different spec.
    DropThenCreate { local: Document, spec: Document },
}

impl IndexAction {
    pub fn drops(&self) -> bool {
        matches!(self, Self::Drop { .. } | Self::DropThenCreate { .. })
    }

    pub fn spec_to_create(&self) -> Option<&Document> {
        match self {
            Self::Create { spec } | Self::DropThenCreate { spec, .. } => Some(spec),
            Self::Drop { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixUpInfo {
    pub docs_to_refetch: BTreeSet<DocId>,
    /// Database each refetched collection lived in, per the oldest folded op.
    pub refetch_dbs: BTreeMap<CollectionId, String>,
    pub collection_fixes: BTreeMap<CollectionId, CollectionFix>,
    pub index_actions: BTreeMap<(CollectionId, String), IndexAction>,
    pub collections_to_resync_metadata: BTreeSet<CollectionId>,
    pub dropped_databases: BTreeSet<String>,
    pub transaction_table_uuid: Option<CollectionId>,
    pub common_point: Option<CommonPoint>,
    /// Sync source rollback id observed when the plan was started.
    pub rbid: i32,
}

fn db_of(ns: &str) -> &str {
    ns.split_once('.').map_or(ns, |(db, _)| db)
}

impl FixUpInfo {
    pub fn new(rbid: i32) -> Self {
        Self {
            rbid,
            ..Self::default()
        }
    }

    /// True when folding produced nothing to correct.
    pub fn is_empty(&self) -> bool {
        self.docs_to_refetch.is_empty()
            && self.collection_fixes.is_empty()
            && self.index_actions.is_empty()
            && self.collections_to_resync_metadata.is_empty()
    }

    /// Folds one divergent local entry into the plan. Entries must arrive
    /// newest first.
    pub fn fold(&mut self, entry: &OplogEntry) -> Result<(), RollbackFatal> {
        if entry.op_type == OpType::Noop {
            return Ok(());
        }
        if entry.ns.is_empty() {
            return Err(RollbackFatal::MissingNamespace(entry.to_string()));
        }
        if entry.o.is_empty() {
            return Err(RollbackFatal::MissingObject(entry.to_string()));
        }
        if entry.op_type == OpType::Update && entry.o2.as_ref().is_none_or(Document::is_empty) {
            return Err(RollbackFatal::MissingObject2(entry.to_string()));
        }

        self.fold_session(entry)?;

        if entry.op_type == OpType::Command {
            self.fold_command(entry)
        } else {
            self.fold_crud(entry)
        }
    }

    fn fold_session(&mut self, entry: &OplogEntry) -> Result<(), RollbackFatal> {
        let lsid = match (entry.txn_number, &entry.session_id) {
            (None, None) => return Ok(()),
            (None, Some(_)) => return Err(RollbackFatal::SessionWithoutTxnNumber(entry.to_string())),
            (Some(_), None) => {
                return Err(RollbackFatal::IncompleteSessionInfo {
                    missing: "lsid",
                    entry: entry.to_string(),
                });
            }
            (Some(_), Some(lsid)) => lsid,
        };
        if entry.stmt_id.is_none() {
            return Err(RollbackFatal::IncompleteSessionInfo {
                missing: "stmtId",
                entry: entry.to_string(),
            });
        }
        let table = self
            .transaction_table_uuid
            .ok_or_else(|| RollbackFatal::MissingTransactionTable(entry.to_string()))?;
        self.docs_to_refetch
            .insert(DocId::new(table, Value::Document(lsid.clone())));
        Ok(())
    }

    fn fold_crud(&mut self, entry: &OplogEntry) -> Result<(), RollbackFatal> {
        let uuid = entry
            .uuid
            .ok_or_else(|| RollbackFatal::MissingCollectionId(entry.to_string()))?;
        let keyed = match (&entry.op_type, &entry.o2) {
            (OpType::Update, Some(o2)) => o2,
            _ => &entry.o,
        };
        let Some(id) = keyed.get("_id") else {
            tracing::error!(
                "Cannot roll back op with no _id. ns: {}, document: {}",
                entry.ns,
                entry
            );
            return Err(RollbackFatal::MissingDocumentId {
                ns: entry.ns.clone(),
                doc: entry.to_string(),
            });
        };

        self.docs_to_refetch.insert(DocId::new(uuid, id.clone()));
        self.refetch_dbs.insert(uuid, db_of(&entry.ns).to_string());
        Ok(())
    }

    fn fold_command(&mut self, entry: &OplogEntry) -> Result<(), RollbackFatal> {
        let command = entry.command().map_err(|e| match e {
            CoreError::UnknownCommand(o) => {
                tracing::error!("Cannot roll back unsupported command: {}", o);
                RollbackFatal::UnsupportedCommand(o)
            }
            other => RollbackFatal::MalformedCommand(other.to_string()),
        })?;
        let uuid = || {
            entry
                .uuid
                .ok_or_else(|| RollbackFatal::MissingCollectionId(entry.to_string()))
        };
        let db = db_of(&entry.ns);

        match command {
            Command::Create { .. } => {
                let uuid = uuid()?;
                self.collection_fixes.insert(uuid, CollectionFix::Drop);
                self.remove_all_docs_to_refetch_for(uuid);
            }
            Command::Drop { coll } => {
                self.fold_drop(uuid()?, entry.op_time, Namespace::new(db, coll));
            }
            Command::CreateIndexes { spec } => {
                let uuid = uuid()?;
                let Some(name) = spec.get_str("name").map(str::to_string) else {
                    tracing::error!(
                        "Missing index name in createIndexes operation on rollback, document: {}",
                        entry
                    );
                    return Err(RollbackFatal::MissingIndexName(entry.to_string()));
                };
                self.fold_index_create(uuid, name, spec);
            }
            Command::DropIndexes { name, spec } => {
                let uuid = uuid()?;
                let Some(spec) = spec else {
                    return Err(RollbackFatal::MissingIndexSpec(entry.to_string()));
                };
                let Some(name) = name.or_else(|| spec.get_str("name").map(str::to_string)) else {
                    return Err(RollbackFatal::MissingIndexName(entry.to_string()));
                };
                self.fold_index_drop(uuid, name, spec);
            }
            Command::CollMod { .. } => {
                self.collections_to_resync_metadata.insert(uuid()?);
            }
            Command::RenameCollection {
                from,
                to,
                drop_target,
                drop_source,
                ..
            } => {
                let uuid = uuid()?;
                if let Some(source) = drop_source {
                    // Cross-database rename: a copy was created under `to`
                    // and the original dropped.
                    self.collection_fixes.insert(uuid, CollectionFix::Drop);
                    self.remove_all_docs_to_refetch_for(uuid);
                    self.fold_drop(source, entry.op_time, from.clone());
                } else {
                    let fix = match self.collection_fixes.remove(&uuid) {
                        None => CollectionFix::Rename {
                            current: to.clone(),
                            target: from,
                        },
                        Some(CollectionFix::Rename { current, .. }) => CollectionFix::Rename {
                            current,
                            target: from,
                        },
                        Some(CollectionFix::Restore {
                            drop_optime,
                            dropped_ns,
                            ..
                        }) => CollectionFix::Restore {
                            drop_optime,
                            dropped_ns,
                            target: from,
                        },
                        Some(CollectionFix::Drop) => CollectionFix::Drop,
                    };
                    self.collection_fixes.insert(uuid, fix);
                }
                if let Some(target) = drop_target {
                    self.fold_drop(target, entry.op_time, to);
                }
            }
            Command::DropDatabase => {
                tracing::info!(
                    "Rollback of dropDatabase on {}: relying on collection level fixes",
                    db
                );
                self.dropped_databases.insert(db.to_string());
            }
            Command::ApplyOps(ops) => {
                for op in &ops {
                    self.fold(op)?;
                }
            }
        }
        Ok(())
    }

    fn fold_drop(&mut self, uuid: CollectionId, drop_optime: OpTime, dropped_ns: Namespace) {
        let fix = match self.collection_fixes.remove(&uuid) {
            Some(CollectionFix::Drop) => CollectionFix::Drop,
            Some(CollectionFix::Rename { target, .. } | CollectionFix::Restore { target, .. }) => {
                CollectionFix::Restore {
                    drop_optime,
                    dropped_ns,
                    target,
                }
            }
            None => CollectionFix::Restore {
                drop_optime,
                target: dropped_ns.clone(),
                dropped_ns,
            },
        };
        self.collection_fixes.insert(uuid, fix);
    }

    fn fold_index_create(&mut self, uuid: CollectionId, name: String, spec: Document) {
        let key = (uuid, name);
        let next = match self.index_actions.remove(&key) {
            None => Some(IndexAction::Drop { local: spec }),
            Some(drop @ IndexAction::Drop { .. }) => Some(drop),
            // Created and later dropped inside the tail: it never existed
            // at the common point.
            Some(IndexAction::Create { .. }) => None,
            Some(IndexAction::DropThenCreate { local, .. }) => Some(IndexAction::Drop { local }),
        };
        if let Some(action) = next {
            self.index_actions.insert(key, action);
        }
    }

    fn fold_index_drop(&mut self, uuid: CollectionId, name: String, spec: Document) {
        let key = (uuid, name);
        let next = match self.index_actions.remove(&key) {
            None => Some(IndexAction::Create { spec }),
            Some(IndexAction::Drop { local }) if local.same_fields(&spec) => None,
            Some(IndexAction::Drop { local }) => Some(IndexAction::DropThenCreate { local, spec }),
            Some(IndexAction::Create { .. }) => Some(IndexAction::Create { spec }),
            Some(IndexAction::DropThenCreate { local, .. }) => {
                Some(IndexAction::DropThenCreate { local, spec })
            }
        };
        if let Some(action) = next {
            self.index_actions.insert(key, action);
        }
    }

    /// Removes every pending document refetch for `uuid`, sentinels included.
    pub fn remove_all_docs_to_refetch_for(&mut self, uuid: CollectionId) {
        let doomed: Vec<DocId> = self
            .docs_to_refetch
            .range(DocId::min_for(uuid)..=DocId::max_for(uuid))
            .cloned()
            .collect();
        for doc in doomed {
            self.docs_to_refetch.remove(&doc);
        }
    }

    /// Drops per-document, per-index and metadata work for collections that
    /// are going to be set aside anyway.
    pub fn remove_redundant_operations(&mut self) {
        let dropped: Vec<CollectionId> = self
            .collection_fixes
            .iter()
            .filter(|(_, fix)| matches!(fix, CollectionFix::Drop))
            .map(|(uuid, _)| *uuid)
            .collect();
        for uuid in dropped {
            tracing::debug!("rollback: skipping fixes for collection {} being dropped", uuid);
            self.remove_all_docs_to_refetch_for(uuid);
            self.index_actions.retain(|(owner, _), _| *owner != uuid);
            self.collections_to_resync_metadata.remove(&uuid);
        }
    }
}
