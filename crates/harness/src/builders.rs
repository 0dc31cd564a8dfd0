//! Oplog entry constructors for staging divergent histories.

use rewind_core::{doc, CollectionId, Document, OpTime, OpType, OplogEntry, RecordId, Timestamp, Value};

pub fn op_time(secs: u32) -> OpTime {
    OpTime::new(Timestamp::new(secs, 0), 1)
}

/// A no-op entry at `secs`; the usual shape of a shared common point.
pub fn noop(secs: u32) -> OplogEntry {
    OplogEntry::new(op_time(secs), OpType::Noop, "", doc! { "msg" => "noop" }).with_hash(i64::from(secs))
}

pub fn insert(secs: u32, ns: &str, uuid: CollectionId, doc: Document) -> OplogEntry {
    OplogEntry::new(op_time(secs), OpType::Insert, ns, doc)
        .with_uuid(uuid)
        .with_hash(i64::from(secs))
}

pub fn update(secs: u32, ns: &str, uuid: CollectionId, id: impl Into<Value>, change: Document) -> OplogEntry {
    OplogEntry::new(op_time(secs), OpType::Update, ns, change)
        .with_o2(doc! { "_id" => id.into() })
        .with_uuid(uuid)
        .with_hash(i64::from(secs))
}

pub fn delete(secs: u32, ns: &str, uuid: CollectionId, id: impl Into<Value>) -> OplogEntry {
    OplogEntry::new(op_time(secs), OpType::Delete, ns, doc! { "_id" => id.into() })
        .with_uuid(uuid)
        .with_hash(i64::from(secs))
}

/// A command entry; `ns` is `<db>.$cmd`.
pub fn command(secs: u32, db: &str, uuid: Option<CollectionId>, o: Document) -> OplogEntry {
    let entry = OplogEntry::new(op_time(secs), OpType::Command, format!("{db}.$cmd"), o)
        .with_hash(i64::from(secs));
    match uuid {
        Some(uuid) => entry.with_uuid(uuid),
        None => entry,
    }
}

pub fn create(secs: u32, db: &str, coll: &str, uuid: CollectionId) -> OplogEntry {
    command(secs, db, Some(uuid), doc! { "create" => coll })
}

pub fn drop(secs: u32, db: &str, coll: &str, uuid: CollectionId) -> OplogEntry {
    command(secs, db, Some(uuid), doc! { "drop" => coll })
}

pub fn coll_mod(secs: u32, db: &str, coll: &str, uuid: CollectionId, change: Document) -> OplogEntry {
    let mut o = doc! { "collMod" => coll };
    for (key, value) in change.iter() {
        o.insert(key, value.clone());
    }
    command(secs, db, Some(uuid), o)
}

pub fn index_spec(ns: &str, key: Document, name: &str) -> Document {
    doc! { "v" => 2, "key" => key, "name" => name, "ns" => ns }
}

pub fn create_index(secs: u32, ns: &str, uuid: CollectionId, key: Document, name: &str) -> OplogEntry {
    let (db, coll) = ns.split_once('.').unwrap_or((ns, ""));
    let mut o = doc! { "createIndexes" => coll };
    for (field, value) in index_spec(ns, key, name).iter() {
        o.insert(field, value.clone());
    }
    command(secs, db, Some(uuid), o)
}

/// Drops `name`; the dropped index's full spec travels in `o2`.
pub fn drop_index(secs: u32, ns: &str, uuid: CollectionId, key: Document, name: &str) -> OplogEntry {
    let (db, coll) = ns.split_once('.').unwrap_or((ns, ""));
    command(secs, db, Some(uuid), doc! { "dropIndexes" => coll, "index" => name })
        .with_o2(index_spec(ns, key, name))
}

pub fn rename(secs: u32, from: &str, to: &str, uuid: CollectionId) -> OplogEntry {
    rename_with(secs, from, to, uuid, None, None)
}

pub fn rename_with(
    secs: u32,
    from: &str,
    to: &str,
    uuid: CollectionId,
    drop_target: Option<CollectionId>,
    drop_source: Option<CollectionId>,
) -> OplogEntry {
    let db = from.split_once('.').map_or(from, |(db, _)| db);
    let mut o = doc! {
        "renameCollection" => from,
        "to" => to,
        "stayTemp" => false,
        "dropTarget" => drop_target.map_or(Value::Bool(false), Value::from),
    };
    if let Some(source) = drop_source {
        o.insert("dropSource", source);
    }
    command(secs, db, Some(uuid), o)
}

pub fn drop_database(secs: u32, db: &str) -> OplogEntry {
    command(secs, db, None, doc! { "dropDatabase" => 1 })
}

/// Sub-operations inherit the batch's op-time and hash.
pub fn apply_ops(secs: u32, ops: &[OplogEntry]) -> OplogEntry {
    let ops: Vec<Value> = ops
        .iter()
        .map(|op| {
            let mut sub = op.to_document();
            for field in ["ts", "t", "h"] {
                sub.remove(field);
            }
            Value::Document(sub)
        })
        .collect();
    command(secs, "admin", None, doc! { "applyOps" => ops })
}

/// Numbers entries, given newest first, with descending record ids so the
/// result reads like a real newest-first oplog scan.
pub fn oplog(entries: Vec<OplogEntry>) -> Vec<(OplogEntry, RecordId)> {
    let total = entries.len() as i64;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| (entry, RecordId::new(total - i as i64)))
        .collect()
}
