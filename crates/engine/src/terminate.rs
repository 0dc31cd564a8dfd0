/// Rollback could not complete and local data may be inconsistent.
pub const UNRECOVERABLE_ROLLBACK: i32 = 28723;
/// The shard identity document was rolled back.
pub const SHARD_IDENTITY_ROLLED_BACK: i32 = 40498;
/// Could not leave the rollback state after finishing.
pub const RECOVERING_TRANSITION_FAILED: i32 = 40499;

/// Ends the process. Rollback failures that leave the node in an unknown
/// state never return to the caller as ordinary errors; they come here.
pub trait Terminator {
    fn terminate(&self, code: i32, message: &str) -> !;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AbortTerminator;

impl Terminator for AbortTerminator {
    fn terminate(&self, code: i32, message: &str) -> ! {
        tracing::error!(code, "Fatal assertion: {}", message);
        std::process::abort()
    }
}
