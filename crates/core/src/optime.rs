use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// An 8-byte logical timestamp: 4 bytes seconds (big-endian u32)
/// followed by 4 bytes increment (big-endian u32).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default)]
pub struct Timestamp {
    secs: u32,
    inc: u32,
}

impl Timestamp {
    pub fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    pub fn secs(&self) -> u32 {
        self.secs
    }

    pub fn inc(&self) -> u32 {
        self.inc
    }

    pub fn is_null(&self) -> bool {
        self.secs == 0 && self.inc == 0
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.secs.to_be_bytes());
        buf[4..].copy_from_slice(&self.inc.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        let mut secs = [0u8; 4];
        let mut inc = [0u8; 4];
        secs.copy_from_slice(&bytes[..4]);
        inc.copy_from_slice(&bytes[4..]);
        Self {
            secs: u32::from_be_bytes(secs),
            inc: u32::from_be_bytes(inc),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde_bytes_vec(deserializer)?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"8 bytes"))?;
        Ok(Timestamp::from_bytes(&arr))
    }
}

fn serde_bytes_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    struct BytesVisitor;

    impl<'de> serde::de::Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte array")
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_bytes(BytesVisitor)
}

/// Position of an operation in the replicated log: timestamp plus the
/// leadership term that produced it.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct OpTime {
    pub ts: Timestamp,
    pub term: i64,
}

impl OpTime {
    pub fn new(ts: Timestamp, term: i64) -> Self {
        Self { ts, term }
    }

    pub fn is_null(&self) -> bool {
        self.ts.is_null()
    }

    /// 16-byte sortable encoding: timestamp bytes then term (big-endian,
    /// sign bit flipped so negative terms sort first).
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.ts.to_bytes());
        buf[8..].copy_from_slice(&((self.term as u64) ^ (1 << 63)).to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidData(format!("optime must be 16 bytes, got {}", bytes.len())))?;
        let mut ts = [0u8; 8];
        let mut term = [0u8; 8];
        ts.copy_from_slice(&arr[..8]);
        term.copy_from_slice(&arr[8..]);
        Ok(Self {
            ts: Timestamp::from_bytes(&ts),
            term: (u64::from_be_bytes(term) ^ (1 << 63)) as i64,
        })
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ts.cmp(&other.ts).then(self.term.cmp(&other.term))
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.ts, self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_bytes() {
        let pairs = vec![
            (Timestamp::new(100, 0), Timestamp::new(200, 0)),
            (Timestamp::new(100, 0), Timestamp::new(100, 1)),
            (Timestamp::new(100, 999), Timestamp::new(101, 0)),
            (Timestamp::new(0, 0), Timestamp::new(0, 1)),
        ];

        for (a, b) in &pairs {
            assert_eq!(a.cmp(b), a.to_bytes().cmp(&b.to_bytes()));
            assert!(a < b, "expected {a:?} < {b:?}");
        }
    }

    #[test]
    fn optime_orders_by_timestamp_then_term() {
        let a = OpTime::new(Timestamp::new(1, 0), 5);
        let b = OpTime::new(Timestamp::new(2, 0), 1);
        let c = OpTime::new(Timestamp::new(2, 0), 2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_bytes().cmp(&b.to_bytes()), a.cmp(&b));
    }

    #[test]
    fn optime_bytes_roundtrip_with_negative_term() {
        let op_time = OpTime::new(Timestamp::new(7, 3), -1);
        let recovered = OpTime::from_bytes(&op_time.to_bytes()).unwrap();
        assert_eq!(op_time, recovered);
        assert!(OpTime::new(Timestamp::new(7, 3), -1).to_bytes() < OpTime::new(Timestamp::new(7, 3), 0).to_bytes());
    }

    #[test]
    fn optime_from_short_slice_is_rejected() {
        assert!(OpTime::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn timestamp_msgpack_roundtrip() {
        let ts = Timestamp::new(1_700_000_000, 42);
        let bytes = rmp_serde::to_vec(&ts).unwrap();
        let recovered: Timestamp = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(ts, recovered);
    }
}
