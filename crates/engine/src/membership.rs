use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Primary,
    Secondary,
    Rollback,
    Recovering,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Rollback => "ROLLBACK",
            Self::Recovering => "RECOVERING",
        })
    }
}

#[derive(Debug, Error)]
#[error("cannot change member state: {0}")]
pub struct CoordinatorError(pub String);

/// The replica-set membership subsystem, as far as rollback needs it.
pub trait ReplicationCoordinator {
    fn member_state(&self) -> MemberState;

    /// Moves this node into a follower state. Refused when the node is no
    /// longer eligible, for instance because it was just elected.
    fn set_follower_mode(&self, state: MemberState) -> Result<(), CoordinatorError>;
}
