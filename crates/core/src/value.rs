use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::CollectionId;
use crate::optime::Timestamp;
use crate::CoreError;

/// A dynamically-typed field value.
///
/// Values of different kinds order by a fixed type rank (`MinKey` lowest,
/// `MaxKey` highest); numbers compare numerically across `Int` and `Double`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    MinKey,
    Null,
    Int(i64),
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    Uuid(Uuid),
    Bool(bool),
    Timestamp(Timestamp),
    MaxKey,
}

impl Value {
    fn type_rank(&self) -> u8 {
        match self {
            Value::MinKey => 0,
            Value::Null => 1,
            Value::Int(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Document(_) => 4,
            Value::Array(_) => 5,
            Value::Uuid(_) => 6,
            Value::Bool(_) => 7,
            Value::Timestamp(_) => 8,
            Value::MaxKey => 9,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::MinKey => "minKey",
            Value::Null => "null",
            Value::Int(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Document(_) => "object",
            Value::Array(_) => "array",
            Value::Uuid(_) => "uuid",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp",
            Value::MaxKey => "maxKey",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Double(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<CollectionId> {
        match self {
            Value::Uuid(u) => Some(CollectionId::from_uuid(*u)),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Double(b)) => cmp_int_double(*a, *b),
            (Value::Double(a), Value::Int(b)) => cmp_int_double(*b, *a).reverse(),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Exact comparison, consistent with `f64::total_cmp` among doubles: an
/// integer sits at its true value and zero equals `+0.0`, above `-0.0`.
fn cmp_int_double(int: i64, double: f64) -> Ordering {
    // 2^63, the first double above every i64.
    const I64_END: f64 = 9_223_372_036_854_775_808.0;

    if double.is_nan() {
        return if double.is_sign_negative() { Ordering::Greater } else { Ordering::Less };
    }
    if double == 0.0 {
        return match int.cmp(&0) {
            Ordering::Equal if double.is_sign_negative() => Ordering::Greater,
            other => other,
        };
    }
    if double >= I64_END {
        return Ordering::Less;
    }
    if double < -I64_END {
        return Ordering::Greater;
    }
    let whole = double.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => whole.total_cmp(&double),
        other => other,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::MinKey => f.write_str("MinKey"),
            Value::Null => f.write_str("null"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(d) => write!(f, "{d:?}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Document(d) => write!(f, "{d}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Uuid(u) => write!(f, "UUID(\"{u}\")"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::MaxKey => f.write_str("MaxKey"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<CollectionId> for Value {
    fn from(id: CollectionId) -> Self {
        Value::Uuid(*id.as_uuid())
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts)
    }
}

/// An ordered list of named fields. Field order is significant for
/// equality and ordering, as in the wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document(Vec<(String, Value)>);

impl Document {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets `key`, replacing an existing field in place or appending.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    pub fn get_uuid(&self, key: &str) -> Option<CollectionId> {
        self.get(key).and_then(Value::as_uuid)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn first(&self) -> Option<(&str, &Value)> {
        self.0.first().map(|(k, v)| (k.as_str(), v))
    }

    pub fn first_key(&self) -> Option<&str> {
        self.first().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Field-set equality: same keys with equal values, top-level order ignored.
    pub fn same_fields(&self, other: &Document) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Document {}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((ka, va), (kb, vb)) in self.0.iter().zip(other.0.iter()) {
            let ord = va.type_rank().cmp(&vb.type_rank()).then_with(|| ka.cmp(kb)).then_with(|| va.cmp(vb));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{ ")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str(" }")
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

/// Builds a [`Document`] from `key => value` pairs.
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::Document::new();
        $(d.insert($key, $value);)+
        d
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_rank_orders_across_kinds() {
        let ordered = vec![
            Value::MinKey,
            Value::Null,
            Value::Int(-5),
            Value::Double(2.5),
            Value::Int(3),
            Value::from("a"),
            Value::from(doc! { "x" => 1 }),
            Value::Array(vec![Value::Int(1)]),
            Value::Uuid(Uuid::nil()),
            Value::Bool(false),
            Value::Timestamp(Timestamp::new(1, 1)),
            Value::MaxKey,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn int_and_double_compare_numerically() {
        assert_eq!(Value::Int(1), Value::Double(1.0));
        assert!(Value::Int(1) < Value::Double(1.5));
        assert!(Value::Double(-0.5) < Value::Int(0));
    }

    #[test]
    fn int_and_double_order_is_exact_beyond_f64_precision() {
        let two_53 = 1i64 << 53;
        let low = Value::Int(two_53);
        let double = Value::Double(two_53 as f64);
        let high = Value::Int(two_53 + 1);

        assert_eq!(low, double);
        assert!(double < high);
        assert!(low < high);
        assert!(Value::Int(i64::MAX) < Value::Double(i64::MAX as f64));
        assert!(Value::Int(i64::MIN) == Value::Double(i64::MIN as f64));
        assert!(Value::Int(i64::MIN) > Value::Double(f64::NEG_INFINITY));
    }

    #[test]
    fn int_zero_sits_between_signed_zeros() {
        assert_eq!(Value::Int(0), Value::Double(0.0));
        assert!(Value::Double(-0.0) < Value::Int(0));
        assert!(Value::Double(-0.0) < Value::Double(0.0));
    }

    #[test]
    fn insert_replaces_existing_field_in_place() {
        let mut d = doc! { "a" => 1, "b" => 2 };
        d.insert("a", "x");
        assert_eq!(d.first_key(), Some("a"));
        assert_eq!(d.get_str("a"), Some("x"));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn field_order_matters_for_equality() {
        let a = doc! { "a" => 1, "b" => 2 };
        let b = doc! { "b" => 2, "a" => 1 };
        assert_ne!(a, b);
        assert!(a.same_fields(&b));
        assert!(!a.same_fields(&doc! { "a" => 1 }));
    }

    #[test]
    fn display_renders_nested_values() {
        let d = doc! { "_id" => 0, "name" => "x", "sub" => doc! { "k" => true } };
        assert_eq!(d.to_string(), "{ _id: 0, name: \"x\", sub: { k: true } }");
        assert_eq!(Document::new().to_string(), "{}");
    }

    #[test]
    fn msgpack_roundtrip() {
        let d = doc! {
            "_id" => 7,
            "ui" => Uuid::now_v7(),
            "ts" => Timestamp::new(3, 4),
            "arr" => vec![Value::Null, Value::from(1.5)],
        };
        let bytes = d.to_msgpack().unwrap();
        assert_eq!(Document::from_msgpack(&bytes).unwrap(), d);
    }
}
