use rewind_storage::Storage;

use crate::common_point::{find_common_point, CommonPointError};
use crate::config::RollbackConfig;
use crate::error::RollbackError;
use crate::executor::sync_fix_up;
use crate::fixup::FixUpInfo;
use crate::oplog::OplogInterface;
use crate::source::RollbackSource;

/// Runs one rollback attempt: find the common point, fold the divergent
/// local tail into a plan, then apply it.
///
/// `required_rbid` is the sync source rollback id observed before the
/// decision to roll back was made, if any. A source that has rolled back
/// since then is not trusted and the attempt is abandoned untouched.
pub fn sync_rollback(
    storage: &mut dyn Storage,
    local: &dyn OplogInterface,
    source: &dyn RollbackSource,
    required_rbid: Option<i32>,
    config: &RollbackConfig,
) -> Result<(), RollbackError> {
    tracing::info!(
        "Starting rollback. Sync source: {}, local oplog: {}",
        source.source(),
        local.describe()
    );
    config.validate()?;

    let rbid = source.rollback_id()?;
    match required_rbid {
        Some(required) if required != rbid => {
            return Err(RollbackError::UpstreamRolledBack {
                required,
                actual: rbid,
            });
        }
        _ => {}
    }

    let mut plan = FixUpInfo::new(rbid);
    plan.transaction_table_uuid = storage
        .collection_by_namespace(&config.transaction_table_ns()?)?
        .map(|coll| coll.uuid);

    let common_point = match find_common_point(local, source.oplog(), |entry| plan.fold(entry)) {
        Ok(common_point) => common_point,
        Err(CommonPointError::OplogStartMissing(reason)) => {
            return Err(RollbackError::OplogStartMissing(reason));
        }
        Err(e) => {
            return Err(RollbackError::Unrecoverable(format!(
                "need to rollback, but unable to determine common point between local and remote oplog: {e}"
            )));
        }
    };
    plan.common_point = Some(common_point);
    plan.remove_redundant_operations();

    tracing::info!(
        "Rollback plan: {} documents to refetch, {} collection fixes, {} index fixes, {} collections to resync",
        plan.docs_to_refetch.len(),
        plan.collection_fixes.len(),
        plan.index_actions.len(),
        plan.collections_to_resync_metadata.len()
    );

    let summary = sync_fix_up(storage, &plan, source, config).map_err(|e| {
        tracing::error!("Rollback failed while applying fixes: {}", e);
        RollbackError::Unrecoverable(e.to_string())
    })?;

    tracing::info!(
        "Rollback finished. Common point {}, {} documents refetched",
        common_point.op_time,
        summary.fetched
    );
    Ok(())
}
