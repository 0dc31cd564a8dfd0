use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("namespace exists: {0}")]
    NamespaceExists(String),

    #[error("index {name} already exists on {ns}")]
    IndexExists { ns: String, name: String },

    #[error("index not found with name [{name}] on {ns}")]
    IndexNotFound { ns: String, name: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("core error: {0}")]
    Core(#[from] rewind_core::CoreError),
}
