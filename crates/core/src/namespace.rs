use std::fmt;

use serde::{Deserialize, Serialize};

use crate::optime::{OpTime, Timestamp};
use crate::CoreError;

const DROP_PENDING_PREFIX: &str = "system.drop.";

/// Namespace of the session transaction table.
pub const TRANSACTION_TABLE: &str = "config.transactions";

/// A `<db>.<collection>` name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Splits on the first `.`; both halves must be non-empty.
    pub fn parse(full: &str) -> Result<Self, CoreError> {
        match full.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(CoreError::InvalidNamespace(full.to_string())),
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    pub fn is_drop_pending(&self) -> bool {
        self.coll.starts_with(DROP_PENDING_PREFIX)
    }

    /// Name a collection is moved to when dropped at `op_time`. The
    /// original collection name is kept as a suffix.
    pub fn make_drop_pending(&self, op_time: OpTime) -> Namespace {
        let coll = format!(
            "{DROP_PENDING_PREFIX}{}i{}t{}.{}",
            op_time.ts.secs(),
            op_time.ts.inc(),
            op_time.term,
            self.coll
        );
        Namespace::new(self.db.clone(), coll)
    }

    /// Recovers the drop op-time encoded in a drop-pending name.
    pub fn drop_pending_optime(&self) -> Result<OpTime, CoreError> {
        let bad = || CoreError::InvalidNamespace(self.to_string());
        let rest = self.coll.strip_prefix(DROP_PENDING_PREFIX).ok_or_else(bad)?;
        let (stamp, _) = rest.split_once('.').ok_or_else(bad)?;
        let (secs, rest) = stamp.split_once('i').ok_or_else(bad)?;
        let (inc, term) = rest.split_once('t').ok_or_else(bad)?;
        let secs = secs.parse::<u32>().map_err(|_| bad())?;
        let inc = inc.parse::<u32>().map_err(|_| bad())?;
        let term = term.parse::<i64>().map_err(|_| bad())?;
        Ok(OpTime::new(Timestamp::new(secs, inc), term))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({self})")
    }
}

impl std::str::FromStr for Namespace {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_dot() {
        let ns = Namespace::parse("test.system.indexes").unwrap();
        assert_eq!(ns.db(), "test");
        assert_eq!(ns.coll(), "system.indexes");
        assert_eq!(ns.to_string(), "test.system.indexes");
    }

    #[test]
    fn parse_rejects_missing_parts() {
        assert!(Namespace::parse("nodot").is_err());
        assert!(Namespace::parse(".coll").is_err());
        assert!(Namespace::parse("db.").is_err());
    }

    #[test]
    fn drop_pending_name_roundtrips_optime() {
        let ns = Namespace::new("test", "t");
        let op_time = OpTime::new(Timestamp::new(2, 1), 3);
        let dp = ns.make_drop_pending(op_time);
        assert_eq!(dp.to_string(), "test.system.drop.2i1t3.t");
        assert!(dp.is_drop_pending());
        assert!(!ns.is_drop_pending());
        assert_eq!(dp.drop_pending_optime().unwrap(), op_time);
    }

    #[test]
    fn transaction_table_parses() {
        let ns = Namespace::parse(TRANSACTION_TABLE).unwrap();
        assert_eq!((ns.db(), ns.coll()), ("config", "transactions"));
    }
}
