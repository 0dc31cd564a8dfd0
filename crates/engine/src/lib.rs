pub mod common_point;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod fixup;
pub mod membership;
pub mod oplog;
pub mod source;
pub mod sync;
pub mod terminate;

pub use common_point::{find_common_point, CommonPoint, CommonPointError};
pub use config::{ConfigError, RollbackConfig};
pub use driver::RollbackDriver;
pub use error::{RollbackError, RollbackFatal, RollbackOutcome};
pub use executor::{sync_fix_up, RefetchSummary};
pub use fixup::{CollectionFix, DocId, FixUpInfo, IndexAction};
pub use membership::{CoordinatorError, MemberState, ReplicationCoordinator};
pub use oplog::{OplogInterface, OplogItem, OplogSnapshot};
pub use source::{CollectionCopy, RollbackSource, SourceError};
pub use sync::sync_rollback;
pub use terminate::{AbortTerminator, Terminator};
