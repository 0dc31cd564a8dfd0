use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS oplog (
    record_id INTEGER PRIMARY KEY,
    ts BLOB NOT NULL CHECK (length(ts) = 8),
    term INTEGER NOT NULL,
    entry BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_oplog_ts ON oplog (ts, term);

CREATE TABLE IF NOT EXISTS collections (
    uuid BLOB PRIMARY KEY CHECK (length(uuid) = 16),
    ns TEXT NOT NULL UNIQUE,
    options BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS indexes (
    uuid BLOB NOT NULL REFERENCES collections (uuid) ON DELETE CASCADE,
    name TEXT NOT NULL,
    spec BLOB NOT NULL,
    PRIMARY KEY (uuid, name)
);

CREATE TABLE IF NOT EXISTS documents (
    uuid BLOB NOT NULL REFERENCES collections (uuid) ON DELETE CASCADE,
    id BLOB NOT NULL,
    doc BLOB NOT NULL,
    PRIMARY KEY (uuid, id)
);

CREATE TABLE IF NOT EXISTS drop_pending (
    ns TEXT PRIMARY KEY,
    drop_optime BLOB NOT NULL CHECK (length(drop_optime) = 16)
);
CREATE INDEX IF NOT EXISTS idx_drop_pending_optime ON drop_pending (drop_optime);

CREATE TABLE IF NOT EXISTS markers (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    min_valid BLOB CHECK (min_valid IS NULL OR length(min_valid) = 16),
    applied_through BLOB CHECK (applied_through IS NULL OR length(applied_through) = 16),
    rollback_id INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO markers (id) VALUES (1);
";
