use rusqlite::{Connection, OptionalExtension};

use rewind_core::{CollectionId, Document, Namespace, OpTime, OplogEntry, RecordId, Value};

use crate::error::StorageError;
use crate::traits::{CollectionRecord, DropPendingRecord, ID_INDEX_NAME, IndexRecord, Storage};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// Storage key for a document `_id`. Integral doubles are keyed as
/// integers so numerically equal ids address the same document.
fn id_key(id: &Value) -> Result<Vec<u8>, StorageError> {
    let normalized = match id {
        Value::Double(d) if d.fract() == 0.0 && d.abs() < i64::MAX as f64 => Value::Int(*d as i64),
        other => other.clone(),
    };
    rmp_serde::to_vec(&normalized).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn id_index_spec() -> Document {
    let mut key = Document::new();
    key.insert("_id", 1);
    let mut spec = Document::new();
    spec.insert("v", 2);
    spec.insert("key", key);
    spec.insert("name", ID_INDEX_NAME);
    spec
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn read_collection(
    uuid_bytes: Vec<u8>,
    ns: String,
    options: Vec<u8>,
) -> Result<CollectionRecord, StorageError> {
    Ok(CollectionRecord {
        uuid: CollectionId::from_bytes(to_array::<16>(uuid_bytes, "uuid")?),
        ns: Namespace::parse(&ns)?,
        options: Document::from_msgpack(&options)?,
    })
}

fn query_collection(
    conn: &Connection,
    sql: &str,
    param: &dyn rusqlite::ToSql,
) -> Result<Option<CollectionRecord>, StorageError> {
    let row = conn
        .query_row(sql, [param], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })
        .optional()?;
    row.map(|(uuid, ns, options)| read_collection(uuid, ns, options))
        .transpose()
}

fn rename_in(conn: &Connection, uuid: CollectionId, to: &Namespace) -> Result<(), StorageError> {
    collection_ns(conn, uuid)?;
    if let Some(existing) = query_collection(conn, "SELECT uuid, ns, options FROM collections WHERE ns = ?1", &to.to_string())? {
        if existing.uuid == uuid {
            return Ok(());
        }
        return Err(StorageError::NamespaceExists(to.to_string()));
    }
    conn.execute(
        "UPDATE collections SET ns = ?1 WHERE uuid = ?2",
        rusqlite::params![to.to_string(), uuid.as_bytes().as_slice()],
    )?;
    Ok(())
}

fn register_drop_pending(conn: &Connection, drop_optime: OpTime, ns: &Namespace) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO drop_pending (ns, drop_optime) VALUES (?1, ?2)
         ON CONFLICT(ns) DO UPDATE SET drop_optime = excluded.drop_optime",
        rusqlite::params![ns.to_string(), &drop_optime.to_bytes()[..]],
    )?;
    Ok(())
}

fn collection_ns(conn: &Connection, uuid: CollectionId) -> Result<Namespace, StorageError> {
    let ns: Option<String> = conn
        .query_row(
            "SELECT ns FROM collections WHERE uuid = ?1",
            rusqlite::params![uuid.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    match ns {
        Some(ns) => Ok(Namespace::parse(&ns)?),
        None => Err(StorageError::NotFound(format!("collection {uuid}"))),
    }
}

fn read_optime_marker(bytes: Option<Vec<u8>>) -> Result<Option<OpTime>, StorageError> {
    bytes.map(|b| OpTime::from_bytes(&b).map_err(StorageError::from)).transpose()
}

impl Storage for SqliteStorage {
    fn create_collection(
        &mut self,
        uuid: CollectionId,
        ns: &Namespace,
        options: &Document,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        if query_collection(&tx, "SELECT uuid, ns, options FROM collections WHERE ns = ?1", &ns.to_string())?.is_some() {
            return Err(StorageError::NamespaceExists(ns.to_string()));
        }
        tx.execute(
            "INSERT INTO collections (uuid, ns, options) VALUES (?1, ?2, ?3)",
            rusqlite::params![uuid.as_bytes().as_slice(), ns.to_string(), options.to_msgpack()?],
        )?;
        tx.execute(
            "INSERT INTO indexes (uuid, name, spec) VALUES (?1, ?2, ?3)",
            rusqlite::params![uuid.as_bytes().as_slice(), ID_INDEX_NAME, id_index_spec().to_msgpack()?],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn drop_collection(&mut self, uuid: CollectionId) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "DELETE FROM collections WHERE uuid = ?1",
            rusqlite::params![uuid.as_bytes().as_slice()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("collection {uuid}")));
        }
        Ok(())
    }

    fn rename_collection(&mut self, uuid: CollectionId, to: &Namespace) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        rename_in(&tx, uuid, to)?;
        tx.commit()?;
        Ok(())
    }

    fn set_collection_options(
        &mut self,
        uuid: CollectionId,
        options: &Document,
    ) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE collections SET options = ?1 WHERE uuid = ?2",
            rusqlite::params![options.to_msgpack()?, uuid.as_bytes().as_slice()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("collection {uuid}")));
        }
        Ok(())
    }

    fn collection_by_uuid(&self, uuid: CollectionId) -> Result<Option<CollectionRecord>, StorageError> {
        let key = uuid.as_bytes().to_vec();
        query_collection(&self.conn, "SELECT uuid, ns, options FROM collections WHERE uuid = ?1", &key)
    }

    fn collection_by_namespace(&self, ns: &Namespace) -> Result<Option<CollectionRecord>, StorageError> {
        query_collection(&self.conn, "SELECT uuid, ns, options FROM collections WHERE ns = ?1", &ns.to_string())
    }

    fn create_index(&mut self, uuid: CollectionId, spec: &Document) -> Result<(), StorageError> {
        let name = spec
            .get_str("name")
            .ok_or_else(|| StorageError::InvalidDocument(format!("index spec has no name: {spec}")))?;
        let tx = self.conn.transaction()?;

        let ns = collection_ns(&tx, uuid)?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM indexes WHERE uuid = ?1 AND name = ?2)",
            rusqlite::params![uuid.as_bytes().as_slice(), name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::IndexExists {
                ns: ns.to_string(),
                name: name.to_string(),
            });
        }
        tx.execute(
            "INSERT INTO indexes (uuid, name, spec) VALUES (?1, ?2, ?3)",
            rusqlite::params![uuid.as_bytes().as_slice(), name, spec.to_msgpack()?],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn drop_index(&mut self, uuid: CollectionId, name: &str) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        let ns = collection_ns(&tx, uuid)?;
        let changed = tx.execute(
            "DELETE FROM indexes WHERE uuid = ?1 AND name = ?2",
            rusqlite::params![uuid.as_bytes().as_slice(), name],
        )?;
        if changed == 0 {
            return Err(StorageError::IndexNotFound {
                ns: ns.to_string(),
                name: name.to_string(),
            });
        }

        tx.commit()?;
        Ok(())
    }

    fn list_indexes(&self, uuid: CollectionId) -> Result<Vec<IndexRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, spec FROM indexes WHERE uuid = ?1 ORDER BY name")?;
        let rows = stmt.query_map(rusqlite::params![uuid.as_bytes().as_slice()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (name, spec) = row?;
            result.push(IndexRecord {
                name,
                spec: Document::from_msgpack(&spec)?,
            });
        }
        Ok(result)
    }

    fn upsert_document(&mut self, uuid: CollectionId, doc: &Document) -> Result<(), StorageError> {
        let id = doc
            .get("_id")
            .ok_or_else(|| StorageError::InvalidDocument(format!("document has no _id: {doc}")))?;
        let tx = self.conn.transaction()?;

        collection_ns(&tx, uuid)?;
        tx.execute(
            "INSERT INTO documents (uuid, id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT(uuid, id) DO UPDATE SET doc = excluded.doc",
            rusqlite::params![uuid.as_bytes().as_slice(), id_key(id)?, doc.to_msgpack()?],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_document(&mut self, uuid: CollectionId, id: &Value) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "DELETE FROM documents WHERE uuid = ?1 AND id = ?2",
            rusqlite::params![uuid.as_bytes().as_slice(), id_key(id)?],
        )?;
        Ok(changed > 0)
    }

    fn find_document(&self, uuid: CollectionId, id: &Value) -> Result<Option<Document>, StorageError> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT doc FROM documents WHERE uuid = ?1 AND id = ?2",
                rusqlite::params![uuid.as_bytes().as_slice(), id_key(id)?],
                |row| row.get(0),
            )
            .optional()?;
        bytes.map(|b| Document::from_msgpack(&b).map_err(StorageError::from)).transpose()
    }

    fn document_count(&self, uuid: CollectionId) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE uuid = ?1",
            rusqlite::params![uuid.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn append_oplog(&mut self, entry: &OplogEntry) -> Result<RecordId, StorageError> {
        self.conn.execute(
            "INSERT INTO oplog (ts, term, entry) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                &entry.op_time.ts.to_bytes()[..],
                entry.op_time.term,
                entry.to_msgpack()?,
            ],
        )?;
        Ok(RecordId::new(self.conn.last_insert_rowid()))
    }

    fn oplog_newest_first(&self) -> Result<Vec<(OplogEntry, RecordId)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT record_id, entry FROM oplog ORDER BY record_id DESC")?;
        let entries = stmt
            .query_map([], |row| {
                let record_id: i64 = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                let entry = OplogEntry::from_msgpack(&bytes).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Blob,
                        Box::new(OpaqueStorageError(e.to_string())),
                    )
                })?;
                Ok((entry, RecordId::new(record_id)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn truncate_oplog_after(&mut self, record_id: RecordId) -> Result<u64, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM oplog WHERE record_id > ?1",
            rusqlite::params![record_id.as_i64()],
        )?;
        Ok(removed as u64)
    }

    fn add_drop_pending(&mut self, drop_optime: OpTime, ns: &Namespace) -> Result<(), StorageError> {
        register_drop_pending(&self.conn, drop_optime, ns)
    }

    fn set_aside_collection(
        &mut self,
        uuid: CollectionId,
        to: &Namespace,
        drop_optime: OpTime,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        rename_in(&tx, uuid, to)?;
        register_drop_pending(&tx, drop_optime, to)?;
        tx.commit()?;
        Ok(())
    }

    fn remove_drop_pending(&mut self, ns: &Namespace) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "DELETE FROM drop_pending WHERE ns = ?1",
            rusqlite::params![ns.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list_drop_pending(&self) -> Result<Vec<DropPendingRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT ns, drop_optime FROM drop_pending ORDER BY drop_optime, ns")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (ns, drop_optime) = row?;
            result.push(DropPendingRecord {
                ns: Namespace::parse(&ns)?,
                drop_optime: OpTime::from_bytes(&drop_optime)?,
            });
        }
        Ok(result)
    }

    fn reap_drop_pending_through(&mut self, op_time: OpTime) -> Result<Vec<Namespace>, StorageError> {
        let tx = self.conn.transaction()?;

        let due: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT ns FROM drop_pending WHERE drop_optime <= ?1 ORDER BY drop_optime, ns",
            )?;
            stmt.query_map(rusqlite::params![&op_time.to_bytes()[..]], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut reaped = Vec::with_capacity(due.len());
        for ns in due {
            tx.execute("DELETE FROM collections WHERE ns = ?1", rusqlite::params![ns])?;
            tx.execute("DELETE FROM drop_pending WHERE ns = ?1", rusqlite::params![ns])?;
            reaped.push(Namespace::parse(&ns)?);
        }

        tx.commit()?;
        Ok(reaped)
    }

    fn min_valid(&self) -> Result<Option<OpTime>, StorageError> {
        let bytes: Option<Vec<u8>> =
            self.conn
                .query_row("SELECT min_valid FROM markers WHERE id = 1", [], |row| row.get(0))?;
        read_optime_marker(bytes)
    }

    fn set_min_valid(&mut self, op_time: OpTime) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE markers SET min_valid = ?1 WHERE id = 1",
            rusqlite::params![&op_time.to_bytes()[..]],
        )?;
        Ok(())
    }

    fn applied_through(&self) -> Result<Option<OpTime>, StorageError> {
        let bytes: Option<Vec<u8>> = self.conn.query_row(
            "SELECT applied_through FROM markers WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        read_optime_marker(bytes)
    }

    fn set_applied_through(&mut self, op_time: OpTime) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE markers SET applied_through = ?1 WHERE id = 1",
            rusqlite::params![&op_time.to_bytes()[..]],
        )?;
        Ok(())
    }

    fn rollback_id(&self) -> Result<i32, StorageError> {
        let rbid: i32 =
            self.conn
                .query_row("SELECT rollback_id FROM markers WHERE id = 1", [], |row| row.get(0))?;
        Ok(rbid)
    }

    fn increment_rollback_id(&mut self) -> Result<i32, StorageError> {
        let tx = self.conn.transaction()?;

        tx.execute("UPDATE markers SET rollback_id = rollback_id + 1 WHERE id = 1", [])?;
        let rbid: i32 =
            tx.query_row("SELECT rollback_id FROM markers WHERE id = 1", [], |row| row.get(0))?;

        tx.commit()?;
        Ok(rbid)
    }
}

/// Wrapper error type used to tunnel decode failures through rusqlite's error system
/// in query_map closures that must return rusqlite::Error.
#[derive(Debug)]
struct OpaqueStorageError(String);

impl std::fmt::Display for OpaqueStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueStorageError {}
