use std::time::Duration;

use rewind_storage::Storage;

use crate::config::RollbackConfig;
use crate::error::RollbackOutcome;
use crate::membership::{MemberState, ReplicationCoordinator};
use crate::oplog::OplogInterface;
use crate::source::RollbackSource;
use crate::sync::sync_rollback;
use crate::terminate::{
    Terminator, RECOVERING_TRANSITION_FAILED, SHARD_IDENTITY_ROLLED_BACK, UNRECOVERABLE_ROLLBACK,
};

/// Moves the node through ROLLBACK and into RECOVERING around one
/// [`sync_rollback`] attempt, and turns unrecoverable outcomes into process
/// termination.
pub struct RollbackDriver<'a> {
    config: RollbackConfig,
    coordinator: &'a dyn ReplicationCoordinator,
    terminator: &'a dyn Terminator,
    sleep: Box<dyn Fn(Duration) + 'a>,
}

impl<'a> RollbackDriver<'a> {
    pub fn new(
        config: RollbackConfig,
        coordinator: &'a dyn ReplicationCoordinator,
        terminator: &'a dyn Terminator,
    ) -> Self {
        Self {
            config,
            coordinator,
            terminator,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replaces the pause taken after a retryable failure.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + 'a) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// `shard_identity_rolled_back` is the caller's snapshot of whether the
    /// shard identity document was among the rolled back writes.
    pub fn rollback(
        &self,
        storage: &mut dyn Storage,
        local: &dyn OplogInterface,
        source: &dyn RollbackSource,
        required_rbid: Option<i32>,
        shard_identity_rolled_back: bool,
    ) -> RollbackOutcome {
        if let Err(e) = self.coordinator.set_follower_mode(MemberState::Rollback) {
            tracing::info!(
                "Cannot transition from {} to ROLLBACK: {}",
                self.coordinator.member_state(),
                e
            );
            return RollbackOutcome::RetryLater {
                reason: e.to_string(),
            };
        }

        let result = sync_rollback(storage, local, source, required_rbid, &self.config);
        match &result {
            Ok(()) => {}
            Err(e) if e.is_unrecoverable() => {
                let message = format!("Unable to complete rollback. A full resync may be needed: {e}");
                tracing::error!("{}", message);
                self.terminator.terminate(UNRECOVERABLE_ROLLBACK, &message);
            }
            Err(e) => {
                tracing::warn!("Rollback cannot complete at this time (retrying later): {}", e);
                (self.sleep)(self.config.retry_delay());
            }
        }

        if shard_identity_rolled_back {
            self.terminator.terminate(
                SHARD_IDENTITY_ROLLED_BACK,
                "shardIdentity document rollback detected.  Shutting down to clear in-memory \
                 sharding state.  Restarting this process should safely return it to a healthy \
                 state",
            );
        }

        if let Err(e) = self.coordinator.set_follower_mode(MemberState::Recovering) {
            tracing::error!("Failed to leave ROLLBACK: {}", e);
            self.terminator.terminate(
                RECOVERING_TRANSITION_FAILED,
                &format!(
                    "Failed to transition into RECOVERING; expected to be in state ROLLBACK; found self in {}",
                    self.coordinator.member_state()
                ),
            );
        }

        RollbackOutcome::from(&result)
    }
}
