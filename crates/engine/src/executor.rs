//! Applies a folded [`FixUpInfo`] to local storage, pulling authoritative
//! state from the sync source.
//!
//! Order: set aside collections created in the tail, move renamed and
//! dropped collections back, fix indexes, resync collection options, then
//! refetch documents. The sync source's rollback id is re-read before any
//! change, after the options resync and periodically during refetch. The
//! local rollback id is bumped only once the first check has passed.

use rewind_core::{doc, CollectionId, CollectionOptions, Document, Namespace, Value};
use rewind_storage::{Storage, StorageError, ID_INDEX_NAME};

use crate::common_point::CommonPoint;
use crate::config::RollbackConfig;
use crate::error::RollbackFatal;
use crate::fixup::{CollectionFix, FixUpInfo};
use crate::source::{RollbackSource, SourceError};

/// Counts reported once document refetch completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefetchSummary {
    pub fetched: u64,
    pub updated: u64,
    pub deleted: u64,
}

pub fn sync_fix_up(
    storage: &mut dyn Storage,
    plan: &FixUpInfo,
    source: &dyn RollbackSource,
    config: &RollbackConfig,
) -> Result<RefetchSummary, RollbackFatal> {
    let common_point = plan.common_point.ok_or(RollbackFatal::MissingCommonPoint)?;
    config.validate()?;
    check_rollback_id(source, plan.rbid)?;

    let local_rbid = storage.increment_rollback_id()?;
    tracing::debug!("rollback: local rollback id now {}", local_rbid);

    let last = source.last_operation()?.ok_or_else(|| {
        SourceError::OperationFailed(format!("no last operation on {}", source.source()))
    })?;
    tracing::info!("Rollback setting minvalid to {}", last.op_time);
    storage.set_min_valid(last.op_time)?;

    drop_created_collections(storage, plan, &common_point)?;
    restore_namespaces(storage, plan, source)?;
    fix_indexes(storage, plan)?;
    resync_collection_options(storage, plan, source)?;
    check_rollback_id(source, plan.rbid)?;

    let summary = refetch_documents(storage, plan, source, config)?;
    tracing::info!(
        "Rollback refetched {} documents: {} updated, {} deleted",
        summary.fetched,
        summary.updated,
        summary.deleted
    );

    let removed = storage.truncate_oplog_after(common_point.record_id)?;
    storage.set_applied_through(common_point.op_time)?;
    tracing::info!(
        "Rollback truncated {} oplog entries after common point {}",
        removed,
        common_point.op_time
    );
    Ok(summary)
}

fn check_rollback_id(source: &dyn RollbackSource, expected: i32) -> Result<(), RollbackFatal> {
    let actual = source.rollback_id()?;
    if actual != expected {
        tracing::error!(
            "Sync source {} rolled back during rollback: rollback id {} != {}",
            source.source(),
            actual,
            expected
        );
        return Err(RollbackFatal::EpochChanged { expected, actual });
    }
    Ok(())
}

fn occupied(uuid: CollectionId, target: &Namespace) -> impl FnOnce(StorageError) -> RollbackFatal + '_ {
    move |e| match e {
        StorageError::NamespaceExists(_) => RollbackFatal::NamespaceOccupied {
            uuid,
            target: target.clone(),
        },
        other => other.into(),
    }
}

/// Collections created in the divergent tail are parked under a
/// drop-pending name rather than destroyed, so a later attempt can still
/// find them.
fn drop_created_collections(
    storage: &mut dyn Storage,
    plan: &FixUpInfo,
    common_point: &CommonPoint,
) -> Result<(), RollbackFatal> {
    for (uuid, fix) in &plan.collection_fixes {
        if *fix != CollectionFix::Drop {
            continue;
        }
        let Some(coll) = storage.collection_by_uuid(*uuid)? else {
            tracing::info!("Rollback: collection {} already gone, nothing to drop", uuid);
            continue;
        };
        if coll.ns.is_drop_pending() {
            // Set aside by an earlier attempt. Registration is an upsert, so
            // re-registering is harmless.
            let drop_optime = coll.ns.drop_pending_optime()?;
            storage.add_drop_pending(drop_optime, &coll.ns)?;
            tracing::debug!("rollback: collection {} already set aside as {}", uuid, coll.ns);
            continue;
        }
        let pending = coll.ns.make_drop_pending(common_point.op_time);
        tracing::info!("Rollback dropping collection {} by renaming it to {}", coll.ns, pending);
        storage.set_aside_collection(*uuid, &pending, common_point.op_time)?;
    }
    Ok(())
}

fn staging_ns(uuid: CollectionId, target: &Namespace) -> Namespace {
    Namespace::new(target.db(), format!("system.rollback.tmp.{uuid}"))
}

/// Renames are applied in two passes through staging names so that swaps
/// and cycles never collide with each other.
fn restore_namespaces(
    storage: &mut dyn Storage,
    plan: &FixUpInfo,
    source: &dyn RollbackSource,
) -> Result<(), RollbackFatal> {
    let mut staged: Vec<(CollectionId, &Namespace)> = Vec::new();
    let mut to_copy: Vec<(CollectionId, &Namespace)> = Vec::new();

    for (uuid, fix) in &plan.collection_fixes {
        match fix {
            CollectionFix::Drop => {}
            CollectionFix::Rename { current, target } => {
                let Some(coll) = storage.collection_by_uuid(*uuid)? else {
                    tracing::warn!(
                        "Rollback cannot rename collection {} from {} back to {}: not found locally",
                        uuid,
                        current,
                        target
                    );
                    continue;
                };
                if coll.ns != *target {
                    storage.rename_collection(*uuid, &staging_ns(*uuid, target))?;
                    staged.push((*uuid, target));
                }
            }
            CollectionFix::Restore {
                drop_optime,
                dropped_ns,
                target,
            } => match storage.collection_by_uuid(*uuid)? {
                Some(coll) => {
                    if storage.remove_drop_pending(&coll.ns)? {
                        tracing::debug!("rollback: unregistered drop-pending {}", coll.ns);
                    }
                    tracing::info!(
                        "Rollback restoring collection {} (dropped at {}) from {} to {}",
                        dropped_ns,
                        drop_optime,
                        coll.ns,
                        target
                    );
                    if coll.ns != *target {
                        storage.rename_collection(*uuid, &staging_ns(*uuid, target))?;
                        staged.push((*uuid, target));
                    }
                }
                None => to_copy.push((*uuid, target)),
            },
        }
    }

    for (uuid, target) in staged {
        storage
            .rename_collection(uuid, target)
            .map_err(occupied(uuid, target))?;
        tracing::info!("Rollback moved collection {} to {}", uuid, target);
    }

    for (uuid, target) in to_copy {
        copy_collection(storage, source, uuid, target)?;
    }
    Ok(())
}

/// Recreates a dropped collection the reaper already reclaimed, wholesale
/// from the sync source.
fn copy_collection(
    storage: &mut dyn Storage,
    source: &dyn RollbackSource,
    uuid: CollectionId,
    target: &Namespace,
) -> Result<(), RollbackFatal> {
    tracing::info!(
        "Rollback copying collection {} ({}) from {}",
        target,
        uuid,
        source.source()
    );
    let copy = source.copy_collection(target)?;
    storage
        .create_collection(uuid, target, &copy.options)
        .map_err(occupied(uuid, target))?;
    for spec in &copy.indexes {
        if spec.get_str("name") == Some(ID_INDEX_NAME) {
            continue;
        }
        storage.create_index(uuid, spec)?;
    }
    for doc in &copy.documents {
        storage.upsert_document(uuid, doc)?;
    }
    Ok(())
}

/// Index corrections are best effort: a failure is logged and the rest of
/// the plan carries on.
fn fix_indexes(storage: &mut dyn Storage, plan: &FixUpInfo) -> Result<(), RollbackFatal> {
    for ((uuid, name), action) in &plan.index_actions {
        let Some(coll) = storage.collection_by_uuid(*uuid)? else {
            tracing::info!(
                "Rollback skipping index {} fixes: collection {} no longer exists",
                name,
                uuid
            );
            continue;
        };

        if action.drops() {
            match storage.drop_index(*uuid, name) {
                Ok(()) => tracing::info!(
                    "Dropped index in rollback: collection = {}, index = {}",
                    coll.ns,
                    name
                ),
                Err(e) => tracing::warn!(
                    "Rollback failed to drop index {} in {}: {}",
                    name,
                    coll.ns,
                    e
                ),
            }
        }

        if let Some(spec) = action.spec_to_create() {
            match storage.create_index(*uuid, spec) {
                Ok(()) => tracing::info!(
                    "Created index in rollback: collection = {}, index = {}",
                    coll.ns,
                    name
                ),
                Err(e) => tracing::warn!(
                    "Rollback failed to create index {} in {}: {}",
                    name,
                    coll.ns,
                    e
                ),
            }
        }
    }
    Ok(())
}

fn resync_collection_options(
    storage: &mut dyn Storage,
    plan: &FixUpInfo,
    source: &dyn RollbackSource,
) -> Result<(), RollbackFatal> {
    for uuid in &plan.collections_to_resync_metadata {
        let Some(coll) = storage.collection_by_uuid(*uuid)? else {
            tracing::info!("Rollback skipping options resync: collection {} no longer exists", uuid);
            continue;
        };
        let Some(info) = source.collection_info_by_uuid(coll.ns.db(), *uuid)? else {
            tracing::info!(
                "Rollback skipping options resync of {}: not found on {}",
                coll.ns,
                source.source()
            );
            continue;
        };

        let options = match info.get("options") {
            None => Document::new(),
            Some(Value::Document(options)) => options.clone(),
            Some(other) => {
                return Err(RollbackFatal::BadCollectionOptions {
                    options: other.to_string(),
                    reason: format!("options must be an object, found {}", other.type_name()),
                });
            }
        };
        // Parsed only to reject malformed known fields; the remote document
        // is stored whole, fields this node does not interpret included.
        CollectionOptions::parse(&options).map_err(|e| RollbackFatal::BadCollectionOptions {
            options: options.to_string(),
            reason: e.to_string(),
        })?;
        storage.set_collection_options(*uuid, &options)?;
        tracing::info!("Rollback resynced collection options of {}: {}", coll.ns, options);
    }
    Ok(())
}

fn refetch_documents(
    storage: &mut dyn Storage,
    plan: &FixUpInfo,
    source: &dyn RollbackSource,
    config: &RollbackConfig,
) -> Result<RefetchSummary, RollbackFatal> {
    let txn_ns = config.transaction_table_ns()?;
    let mut summary = RefetchSummary::default();

    for doc_id in &plan.docs_to_refetch {
        let is_txn_table = plan.transaction_table_uuid == Some(doc_id.uuid);
        let local = storage.collection_by_uuid(doc_id.uuid)?;
        let db = if is_txn_table {
            txn_ns.db().to_string()
        } else if let Some(coll) = &local {
            coll.ns.db().to_string()
        } else if let Some(db) = plan.refetch_dbs.get(&doc_id.uuid) {
            db.clone()
        } else {
            tracing::warn!(
                "Rollback cannot refetch {} from collection {}: database unknown",
                doc_id.id,
                doc_id.uuid
            );
            continue;
        };

        let filter = doc! { "_id" => doc_id.id.clone() };
        let (found, remote_ns) = source.find_one_by_uuid(&db, doc_id.uuid, &filter)?;
        summary.fetched += 1;
        if summary.fetched % config.epoch_check_interval == 0 {
            check_rollback_id(source, plan.rbid)?;
        }

        if is_txn_table && remote_ns.as_ref() != Some(&txn_ns) {
            return Err(RollbackFatal::TransactionTableMoved {
                expected: txn_ns,
                actual: remote_ns.map_or_else(|| "<none>".to_string(), |ns| ns.to_string()),
            });
        }

        if local.is_none() {
            tracing::debug!(
                "rollback: collection {} no longer exists locally, skipping {}",
                doc_id.uuid,
                doc_id.id
            );
            continue;
        }

        match found {
            Some(doc) if !doc.is_empty() => {
                storage.upsert_document(doc_id.uuid, &doc)?;
                summary.updated += 1;
            }
            _ => {
                if storage.delete_document(doc_id.uuid, &doc_id.id)? {
                    summary.deleted += 1;
                }
            }
        }
    }

    check_rollback_id(source, plan.rbid)?;
    Ok(summary)
}
