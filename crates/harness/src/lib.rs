//! Test fixtures for rollback: a scripted sync source, a node backed by
//! real storage, oplog builders, and log capture.

pub mod builders;
pub mod capture;
pub mod coordinator;
pub mod node;
pub mod source;

pub use capture::{init_test_logging, CapturedLine, LogCapture};
pub use coordinator::{PanickingTerminator, TestCoordinator};
pub use node::TestNode;
pub use source::MockSource;
