use rewind_core::{OplogEntry, RecordId};
use rewind_storage::{Storage, StorageError};

use crate::source::SourceError;

pub type OplogItem = Result<(OplogEntry, RecordId), SourceError>;

/// Newest-first cursor over an operation log.
pub trait OplogInterface {
    fn iter(&self) -> Box<dyn Iterator<Item = OplogItem> + '_>;

    fn describe(&self) -> String;
}

/// An in-memory, newest-first copy of an operation log.
#[derive(Debug, Clone, Default)]
pub struct OplogSnapshot {
    entries: Vec<(OplogEntry, RecordId)>,
    label: String,
}

impl OplogSnapshot {
    /// `entries` must already be ordered newest first.
    pub fn new(label: impl Into<String>, entries: Vec<(OplogEntry, RecordId)>) -> Self {
        Self {
            entries,
            label: label.into(),
        }
    }

    pub fn from_storage(storage: &dyn Storage) -> Result<Self, StorageError> {
        Ok(Self::new("local oplog", storage.oplog_newest_first()?))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OplogInterface for OplogSnapshot {
    fn iter(&self) -> Box<dyn Iterator<Item = OplogItem> + '_> {
        Box::new(self.entries.iter().cloned().map(Ok))
    }

    fn describe(&self) -> String {
        format!("{} ({} entries)", self.label, self.entries.len())
    }
}
