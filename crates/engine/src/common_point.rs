use rewind_core::{OpTime, OplogEntry, RecordId};
use thiserror::Error;

use crate::error::RollbackFatal;
use crate::oplog::{OplogInterface, OplogItem};
use crate::source::SourceError;

/// Newest operation present, identically, in both logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonPoint {
    pub op_time: OpTime,
    /// Position of the common entry in the local log.
    pub record_id: RecordId,
}

#[derive(Debug, Error)]
pub enum CommonPointError {
    #[error("OplogStartMissing: {0}")]
    OplogStartMissing(String),

    #[error("InvalidSyncSource: {0}")]
    InvalidSyncSource(String),

    #[error("NoMatchingDocument: {0}")]
    NoMatchingDocument(String),

    #[error(transparent)]
    Fatal(#[from] RollbackFatal),

    #[error(transparent)]
    Source(#[from] SourceError),
}

fn advance(
    iter: &mut dyn Iterator<Item = OplogItem>,
    side: &str,
) -> Result<(OplogEntry, RecordId), CommonPointError> {
    match iter.next() {
        Some(item) => Ok(item?),
        None => Err(CommonPointError::NoMatchingDocument(format!(
            "reached beginning of {side} oplog"
        ))),
    }
}

/// Walks both logs backward from their heads until an entry with the same
/// op-time and hash is found on both sides.
///
/// Every local entry passed over on the way is handed to `on_divergent`,
/// newest first. The remote log is read before the local one so that an
/// unreadable sync source is reported even when the local log is empty.
pub fn find_common_point<F>(
    local: &dyn OplogInterface,
    remote: &dyn OplogInterface,
    mut on_divergent: F,
) -> Result<CommonPoint, CommonPointError>
where
    F: FnMut(&OplogEntry) -> Result<(), RollbackFatal>,
{
    let mut remote_iter = remote.iter();
    let (mut theirs, _) = match remote_iter.next() {
        Some(Ok(item)) => item,
        Some(Err(e)) => {
            return Err(CommonPointError::InvalidSyncSource(format!(
                "remote oplog empty or unreadable: {e}"
            )));
        }
        None => {
            return Err(CommonPointError::InvalidSyncSource(
                "remote oplog empty or unreadable".to_string(),
            ));
        }
    };

    let mut local_iter = local.iter();
    let (mut ours, mut our_record) = match local_iter.next() {
        Some(Ok(item)) => item,
        _ => {
            return Err(CommonPointError::OplogStartMissing(
                "no oplog during initsync".to_string(),
            ));
        }
    };

    tracing::info!(
        "rollback our last optime: {}, their last optime: {}",
        ours.op_time,
        theirs.op_time
    );

    let mut divergent = 0u64;
    loop {
        if ours.op_time == theirs.op_time {
            if ours.hash == theirs.hash {
                tracing::info!(
                    "rollback common point is {}, {} local ops to roll back",
                    ours.op_time,
                    divergent
                );
                return Ok(CommonPoint {
                    op_time: ours.op_time,
                    record_id: our_record,
                });
            }
            tracing::debug!("rollback: same op-time, different hash: {}", ours.op_time);
            on_divergent(&ours)?;
            divergent += 1;
            (ours, our_record) = advance(&mut *local_iter, "local")?;
            (theirs, _) = advance(&mut *remote_iter, "remote")?;
        } else if ours.op_time > theirs.op_time {
            tracing::debug!("rollback: local op newer than remote head: {}", ours);
            on_divergent(&ours)?;
            divergent += 1;
            (ours, our_record) = advance(&mut *local_iter, "local")?;
        } else {
            (theirs, _) = advance(&mut *remote_iter, "remote")?;
        }
    }
}
