pub mod catalog;
pub mod error;
pub mod ids;
pub mod namespace;
pub mod oplog;
pub mod optime;
pub mod value;

pub use catalog::CollectionOptions;
pub use error::CoreError;
pub use ids::*;
pub use namespace::Namespace;
pub use oplog::{Command, OpType, OplogEntry};
pub use optime::{OpTime, Timestamp};
pub use value::{Document, Value};
