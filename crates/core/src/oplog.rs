use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::CollectionId;
use crate::namespace::Namespace;
use crate::optime::OpTime;
use crate::value::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Command => "c",
            Self::Noop => "n",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "i" => Ok(Self::Insert),
            "u" => Ok(Self::Update),
            "d" => Ok(Self::Delete),
            "c" => Ok(Self::Command),
            "n" => Ok(Self::Noop),
            other => Err(CoreError::InvalidOperation(format!("unknown op type: {other}"))),
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a replicated operation log.
///
/// `ns` is kept as the raw string carried by the entry; it may be empty in
/// a malformed log, which is why it is not a parsed [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogEntry {
    pub op_time: OpTime,
    pub hash: i64,
    pub op_type: OpType,
    pub ns: String,
    pub uuid: Option<CollectionId>,
    pub o: Document,
    pub o2: Option<Document>,
    pub txn_number: Option<i64>,
    pub stmt_id: Option<i32>,
    pub session_id: Option<Document>,
}

impl OplogEntry {
    pub fn new(op_time: OpTime, op_type: OpType, ns: impl Into<String>, o: Document) -> Self {
        Self {
            op_time,
            hash: 0,
            op_type,
            ns: ns.into(),
            uuid: None,
            o,
            o2: None,
            txn_number: None,
            stmt_id: None,
            session_id: None,
        }
    }

    pub fn with_hash(mut self, hash: i64) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_uuid(mut self, uuid: CollectionId) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_o2(mut self, o2: Document) -> Self {
        self.o2 = Some(o2);
        self
    }

    pub fn with_txn_number(mut self, txn_number: i64) -> Self {
        self.txn_number = Some(txn_number);
        self
    }

    pub fn with_stmt_id(mut self, stmt_id: i32) -> Self {
        self.stmt_id = Some(stmt_id);
        self
    }

    pub fn with_session_id(mut self, session_id: Document) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn namespace(&self) -> Result<Namespace, CoreError> {
        Namespace::parse(&self.ns)
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("ts", self.op_time.ts);
        doc.insert("t", self.op_time.term);
        doc.insert("h", self.hash);
        doc.insert("op", self.op_type.as_str());
        doc.insert("ns", self.ns.as_str());
        if let Some(uuid) = self.uuid {
            doc.insert("ui", uuid);
        }
        doc.insert("o", self.o.clone());
        if let Some(o2) = &self.o2 {
            doc.insert("o2", o2.clone());
        }
        if let Some(txn_number) = self.txn_number {
            doc.insert("txnNumber", txn_number);
        }
        if let Some(stmt_id) = self.stmt_id {
            doc.insert("stmtId", stmt_id);
        }
        if let Some(lsid) = &self.session_id {
            doc.insert("lsid", lsid.clone());
        }
        doc
    }

    pub fn from_document(doc: &Document) -> Result<Self, CoreError> {
        Self::parse(doc, None)
    }

    /// Parses an entry; missing `ts`/`t`/`h` fall back to `parent` when
    /// given (sub-operations of a batch carry no op-time of their own).
    fn parse(doc: &Document, parent: Option<(OpTime, i64)>) -> Result<Self, CoreError> {
        let ts = match (doc.get("ts"), parent) {
            (Some(v), _) => v
                .as_timestamp()
                .ok_or_else(|| invalid(doc, "ts must be a timestamp"))?,
            (None, Some((op_time, _))) => op_time.ts,
            (None, None) => return Err(invalid(doc, "missing ts")),
        };
        let term = match (doc.get("t"), parent) {
            (Some(v), _) => v.as_i64().ok_or_else(|| invalid(doc, "t must be a number"))?,
            (None, Some((op_time, _))) => op_time.term,
            (None, None) => -1,
        };
        let hash = match (doc.get("h"), parent) {
            (Some(v), _) => v.as_i64().ok_or_else(|| invalid(doc, "h must be a number"))?,
            (None, Some((_, hash))) => hash,
            (None, None) => 0,
        };
        let op_type = OpType::parse(doc.get_str("op").ok_or_else(|| invalid(doc, "missing op"))?)?;
        let ns = match doc.get("ns") {
            None => String::new(),
            Some(v) => v.as_str().ok_or_else(|| invalid(doc, "ns must be a string"))?.to_string(),
        };
        let uuid = match doc.get("ui") {
            None => None,
            Some(v) => Some(v.as_uuid().ok_or_else(|| invalid(doc, "ui must be a uuid"))?),
        };
        let o = match doc.get("o") {
            None => Document::new(),
            Some(v) => v.as_document().ok_or_else(|| invalid(doc, "o must be an object"))?.clone(),
        };
        let o2 = match doc.get("o2") {
            None => None,
            Some(v) => Some(v.as_document().ok_or_else(|| invalid(doc, "o2 must be an object"))?.clone()),
        };
        let txn_number = match doc.get("txnNumber") {
            None => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| invalid(doc, "txnNumber must be a number"))?),
        };
        let stmt_id = match doc.get("stmtId") {
            None => None,
            Some(v) => {
                let wide = v.as_i64().ok_or_else(|| invalid(doc, "stmtId must be a number"))?;
                Some(i32::try_from(wide).map_err(|_| invalid(doc, "stmtId out of range"))?)
            }
        };
        let session_id = match doc.get("lsid") {
            None => None,
            Some(v) => Some(v.as_document().ok_or_else(|| invalid(doc, "lsid must be an object"))?.clone()),
        };

        Ok(Self {
            op_time: OpTime::new(ts, term),
            hash,
            op_type,
            ns,
            uuid,
            o,
            o2,
            txn_number,
            stmt_id,
            session_id,
        })
    }

    /// Decodes the command carried by a `c` entry from the first field of `o`.
    pub fn command(&self) -> Result<Command, CoreError> {
        if self.op_type != OpType::Command {
            return Err(CoreError::InvalidOperation(format!("not a command: {}", self.to_document())));
        }
        let (name, first) = self.o.first().ok_or_else(|| invalid(&self.o, "empty command"))?;
        let coll_name = || {
            first
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(&self.o, "collection name must be a string"))
        };

        match name {
            "create" => Ok(Command::Create { coll: coll_name()? }),
            "drop" => Ok(Command::Drop { coll: coll_name()? }),
            "collMod" => Ok(Command::CollMod { coll: coll_name()? }),
            "dropDatabase" => Ok(Command::DropDatabase),
            "createIndexes" => {
                let mut spec = self.o.clone();
                spec.remove("createIndexes");
                Ok(Command::CreateIndexes { spec })
            }
            "dropIndexes" | "deleteIndexes" => Ok(Command::DropIndexes {
                name: self.o.get_str("index").map(str::to_string),
                spec: self.o2.clone(),
            }),
            "renameCollection" => {
                let from = Namespace::parse(first.as_str().ok_or_else(|| invalid(&self.o, "renameCollection must be a string"))?)?;
                let to = Namespace::parse(self.o.get_str("to").ok_or_else(|| invalid(&self.o, "missing to"))?)?;
                let drop_target = match self.o.get("dropTarget") {
                    None | Some(Value::Bool(_)) => None,
                    Some(v) => Some(v.as_uuid().ok_or_else(|| invalid(&self.o, "dropTarget must be a uuid or bool"))?),
                };
                let drop_source = match self.o.get("dropSource") {
                    None => None,
                    Some(v) => Some(v.as_uuid().ok_or_else(|| invalid(&self.o, "dropSource must be a uuid"))?),
                };
                Ok(Command::RenameCollection {
                    from,
                    to,
                    drop_target,
                    drop_source,
                })
            }
            "applyOps" => {
                let ops = first
                    .as_array()
                    .ok_or_else(|| invalid(&self.o, "applyOps must be an array"))?;
                let entries = ops
                    .iter()
                    .map(|op| {
                        let sub = op
                            .as_document()
                            .ok_or_else(|| invalid(&self.o, "applyOps entries must be objects"))?;
                        Self::parse(sub, Some((self.op_time, self.hash)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Command::ApplyOps(entries))
            }
            _ => Err(CoreError::UnknownCommand(self.o.to_string())),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl fmt::Display for OplogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_document())
    }
}

fn invalid(doc: &Document, reason: &str) -> CoreError {
    CoreError::InvalidOperation(format!("{reason}: {doc}"))
}

/// A catalog command carried by a `c` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create {
        coll: String,
    },
    Drop {
        coll: String,
    },
    /// `spec` is the index specification (the command object minus its
    /// leading `createIndexes` field). It may lack a `name`.
    CreateIndexes {
        spec: Document,
    },
    /// `spec` is the full specification of the dropped index, carried in `o2`.
    DropIndexes {
        name: Option<String>,
        spec: Option<Document>,
    },
    CollMod {
        coll: String,
    },
    RenameCollection {
        from: Namespace,
        to: Namespace,
        drop_target: Option<CollectionId>,
        drop_source: Option<CollectionId>,
    },
    DropDatabase,
    ApplyOps(Vec<OplogEntry>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Drop { .. } => "drop",
            Self::CreateIndexes { .. } => "createIndexes",
            Self::DropIndexes { .. } => "dropIndexes",
            Self::CollMod { .. } => "collMod",
            Self::RenameCollection { .. } => "renameCollection",
            Self::DropDatabase => "dropDatabase",
            Self::ApplyOps(_) => "applyOps",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::optime::Timestamp;

    fn op_time(secs: u32) -> OpTime {
        OpTime::new(Timestamp::new(secs, 0), 1)
    }

    #[test]
    fn document_roundtrip_keeps_every_field() {
        let uuid = CollectionId::new();
        let entry = OplogEntry::new(op_time(5), OpType::Update, "test.t", doc! { "$set" => doc! { "a" => 1 } })
            .with_hash(42)
            .with_uuid(uuid)
            .with_o2(doc! { "_id" => 3 })
            .with_txn_number(1)
            .with_stmt_id(0)
            .with_session_id(doc! { "id" => CollectionId::new() });

        let parsed = OplogEntry::from_document(&entry.to_document()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn missing_ts_is_rejected() {
        let err = OplogEntry::from_document(&doc! { "op" => "i", "ns" => "test.t" }).unwrap_err();
        assert!(err.to_string().contains("missing ts"));
    }

    #[test]
    fn stmt_id_beyond_i32_is_rejected() {
        let entry = doc! {
            "ts" => Timestamp::new(1, 1),
            "op" => "i",
            "ns" => "test.t",
            "stmtId" => i64::from(i32::MAX) + 1,
        };
        let err = OplogEntry::from_document(&entry).unwrap_err();
        assert!(err.to_string().contains("stmtId out of range"), "{err}");

        let negative = doc! { "ts" => Timestamp::new(1, 1), "op" => "i", "ns" => "test.t", "stmtId" => -1 };
        assert_eq!(OplogEntry::from_document(&negative).unwrap().stmt_id, Some(-1));
    }

    #[test]
    fn missing_ns_and_o_parse_as_empty() {
        let entry = OplogEntry::from_document(&doc! { "ts" => Timestamp::new(1, 1), "op" => "i" }).unwrap();
        assert!(entry.ns.is_empty());
        assert!(entry.o.is_empty());
        assert!(entry.namespace().is_err());
    }

    #[test]
    fn decodes_rename_with_drop_target() {
        let target = CollectionId::new();
        let entry = OplogEntry::new(
            op_time(2),
            OpType::Command,
            "test.$cmd",
            doc! { "renameCollection" => "test.x", "to" => "test.y", "stayTemp" => false, "dropTarget" => target },
        );
        match entry.command().unwrap() {
            Command::RenameCollection { from, to, drop_target, drop_source, .. } => {
                assert_eq!(from.to_string(), "test.x");
                assert_eq!(to.to_string(), "test.y");
                assert_eq!(drop_target, Some(target));
                assert_eq!(drop_source, None);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let no_target = OplogEntry::new(
            op_time(2),
            OpType::Command,
            "test.$cmd",
            doc! { "renameCollection" => "test.x", "to" => "test.y", "dropTarget" => false },
        );
        assert!(matches!(
            no_target.command().unwrap(),
            Command::RenameCollection { drop_target: None, .. }
        ));
    }

    #[test]
    fn create_indexes_spec_strips_command_field() {
        let entry = OplogEntry::new(
            op_time(2),
            OpType::Command,
            "test.$cmd",
            doc! { "createIndexes" => "t", "v" => 2, "key" => doc! { "a" => 1 }, "name" => "a_1" },
        );
        let Command::CreateIndexes { spec } = entry.command().unwrap() else {
            panic!("expected createIndexes");
        };
        assert_eq!(spec, doc! { "v" => 2, "key" => doc! { "a" => 1 }, "name" => "a_1" });
    }

    #[test]
    fn apply_ops_inherits_parent_optime() {
        let entry = OplogEntry::new(
            op_time(9),
            OpType::Command,
            "admin.$cmd",
            doc! {
                "applyOps" => vec![
                    Value::from(doc! { "op" => "i", "ns" => "test.t", "o" => doc! { "_id" => 1 } }),
                    Value::from(doc! { "op" => "d", "ns" => "test.t", "o" => doc! { "_id" => 2 } }),
                ],
            },
        )
        .with_hash(77);

        let Command::ApplyOps(ops) = entry.command().unwrap() else {
            panic!("expected applyOps");
        };
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.op_time == op_time(9) && op.hash == 77));
        assert_eq!(ops[1].op_type, OpType::Delete);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let entry = OplogEntry::new(op_time(2), OpType::Command, "test.$cmd", doc! { "convertToCapped" => "t" });
        let err = entry.command().unwrap_err();
        assert!(matches!(err, CoreError::UnknownCommand(_)));
    }
}
