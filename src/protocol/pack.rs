//! Typed key-value record codec used by the login exchange
//!
//! Record format (big endian):
//! ```text
//! +----------------+
//! | field_count(4) |
//! +----------------+---------+----------+---------------+---------+
//! | name_len+1 (4) | name    | type (4) | item_count(4) | item    |  x field_count
//! +----------------+---------+----------+---------------+---------+
//! ```
//!
//! Items: type 0 = u32, 4 = u64, 1/2/3 = `size(4)` followed by `size` bytes
//! (raw data for 1, text for 2 and 3).
//!
//! The encoder only emits types 0, 1 and 2. Decoding understands all five
//! codes, so the two directions are not symmetric.

use super::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

const TYPE_INT: u32 = 0;
const TYPE_DATA: u32 = 1;
const TYPE_STR: u32 = 2;
const TYPE_UNISTR: u32 = 3;
const TYPE_INT64: u32 = 4;

/// A single field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    UInt32(u32),
    UInt64(u64),
    Bytes(Bytes),
    Text(String),
}

impl WireValue {
    /// Integer view of the value, if it has one
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            WireValue::UInt32(v) => Some(u64::from(*v)),
            WireValue::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<u32> for WireValue {
    fn from(v: u32) -> Self {
        WireValue::UInt32(v)
    }
}

impl From<u64> for WireValue {
    fn from(v: u64) -> Self {
        WireValue::UInt64(v)
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::UInt32(v as u32)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Text(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Text(v)
    }
}

impl From<Bytes> for WireValue {
    fn from(v: Bytes) -> Self {
        WireValue::Bytes(v)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(v: Vec<u8>) -> Self {
        WireValue::Bytes(Bytes::from(v))
    }
}

/// Named collection of values exchanged in one handshake message.
///
/// A field may be present without a value (for example when an echoed
/// server field was missing); such a set decodes fine but refuses to encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    fields: BTreeMap<String, Option<WireValue>>,
}

impl RecordSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<WireValue>) {
        self.fields.insert(name.into(), Some(value.into()));
    }

    /// Insert a field whose value may be absent
    pub fn insert_opt(&mut self, name: impl Into<String>, value: Option<WireValue>) {
        self.fields.insert(name.into(), value);
    }

    /// Look up a field value
    pub fn get(&self, name: &str) -> Option<&WireValue> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    /// Check whether a field is present, with or without a value
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the set has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&WireValue>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Encode into the wire format
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(64 * self.fields.len().max(1));
        buf.put_u32(self.fields.len() as u32);

        for (name, value) in &self.fields {
            if name.is_empty() {
                return Err(ProtocolError::EmptyName);
            }
            // Length counts a terminator that is never written
            buf.put_u32(name.len() as u32 + 1);
            buf.put_slice(name.as_bytes());

            match value {
                None => return Err(ProtocolError::NilValue(name.clone())),
                Some(WireValue::UInt32(v)) => {
                    buf.put_u32(TYPE_INT);
                    buf.put_u32(1);
                    buf.put_u32(*v);
                }
                Some(WireValue::Bytes(data)) => {
                    put_sized(&mut buf, TYPE_DATA, data);
                }
                Some(WireValue::Text(text)) => {
                    put_sized(&mut buf, TYPE_STR, text.as_bytes());
                }
                Some(WireValue::UInt64(_)) => {
                    return Err(ProtocolError::UnsupportedType(name.clone()));
                }
            }
        }

        Ok(buf.freeze())
    }

    /// Decode from the wire format
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(data);
        let mut set = RecordSet::new();

        let field_count = cursor.u32()?;
        for _ in 0..field_count {
            let name_len = cursor.u32()?;
            if name_len == 0 {
                return Err(ProtocolError::BadNameLength);
            }
            let name_bytes = cursor.take(name_len as usize - 1)?;
            let name = String::from_utf8_lossy(name_bytes).into_owned();

            let type_code = cursor.u32()?;
            let item_count = cursor.u32()?;
            if item_count != 1 {
                return Err(ProtocolError::MultiItemUnsupported(item_count));
            }

            let value = match type_code {
                TYPE_INT => WireValue::UInt32(cursor.u32()?),
                TYPE_INT64 => WireValue::UInt64(cursor.u64()?),
                TYPE_DATA => WireValue::Bytes(Bytes::copy_from_slice(cursor.sized()?)),
                // TODO: decode TYPE_UNISTR once the gateway's wide-string encoding is confirmed
                TYPE_STR | TYPE_UNISTR => {
                    let raw = cursor.sized()?;
                    let text = std::str::from_utf8(raw)
                        .map_err(|_| ProtocolError::InvalidText(name.clone()))?;
                    WireValue::Text(text.to_string())
                }
                other => return Err(ProtocolError::UnknownType(other)),
            };

            set.fields.insert(name, Some(value));
        }

        Ok(set)
    }
}

fn put_sized(buf: &mut BytesMut, type_code: u32, data: &[u8]) {
    buf.put_u32(type_code);
    buf.put_u32(1);
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

/// Bounds-checked read position over a borrowed buffer
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn sized(&mut self) -> Result<&'a [u8], ProtocolError> {
        let size = self.u32()?;
        self.take(size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn field(out: &mut Vec<u8>, name: &str, type_code: u32, items: u32) {
        out.extend_from_slice(&(name.len() as u32 + 1).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&type_code.to_be_bytes());
        out.extend_from_slice(&items.to_be_bytes());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut set = RecordSet::new();
        set.insert("method", "login");
        set.insert("authtype", 2u32);
        set.insert("random", vec![0xde, 0xad, 0xbe, 0xef]);
        set.insert("empty", "");

        let encoded = set.encode().unwrap();
        let decoded = RecordSet::decode(&encoded).unwrap();

        assert_eq!(decoded, set);
    }

    #[test]
    fn test_encode_layout() {
        let mut set = RecordSet::new();
        set.insert("ab", 7u32);

        let encoded = set.encode().unwrap();
        let expected: Vec<u8> = [
            &1u32.to_be_bytes()[..],
            &3u32.to_be_bytes(),
            b"ab",
            &0u32.to_be_bytes(),
            &1u32.to_be_bytes(),
            &7u32.to_be_bytes(),
        ]
        .concat();

        assert_eq!(&encoded[..], &expected[..]);
    }

    #[test]
    fn test_decode_int64_and_unistr() {
        let mut raw = 2u32.to_be_bytes().to_vec();
        field(&mut raw, "build", TYPE_INT64, 1);
        raw.extend_from_slice(&9_000_000_000u64.to_be_bytes());
        field(&mut raw, "hello", TYPE_UNISTR, 1);
        raw.extend_from_slice(&5u32.to_be_bytes());
        raw.extend_from_slice(b"hi vp");

        let set = RecordSet::decode(&raw).unwrap();
        assert_eq!(set.get("build"), Some(&WireValue::UInt64(9_000_000_000)));
        assert_eq!(set.get("hello").and_then(WireValue::as_str), Some("hi vp"));
    }

    #[test]
    fn test_decode_zero_name_length() {
        let mut raw = 1u32.to_be_bytes().to_vec();
        raw.extend_from_slice(&0u32.to_be_bytes());

        assert_eq!(RecordSet::decode(&raw), Err(ProtocolError::BadNameLength));
    }

    #[test]
    fn test_decode_multi_item() {
        for items in [0u32, 2, 17] {
            let mut raw = 1u32.to_be_bytes().to_vec();
            field(&mut raw, "x", TYPE_INT, items);
            raw.extend_from_slice(&1u32.to_be_bytes());

            assert_eq!(
                RecordSet::decode(&raw),
                Err(ProtocolError::MultiItemUnsupported(items))
            );
        }
    }

    #[test]
    fn test_decode_truncated() {
        // Declared data size far beyond the buffer
        let mut raw = 1u32.to_be_bytes().to_vec();
        field(&mut raw, "blob", TYPE_DATA, 1);
        raw.extend_from_slice(&1000u32.to_be_bytes());
        raw.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            RecordSet::decode(&raw),
            Err(ProtocolError::Truncated { needed: 1000, remaining: 10 })
        ));

        // Name length past the end
        let mut raw = 1u32.to_be_bytes().to_vec();
        raw.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            RecordSet::decode(&raw),
            Err(ProtocolError::Truncated { .. })
        ));

        // Every strict prefix of a valid record fails cleanly
        let mut set = RecordSet::new();
        set.insert("hello", "server");
        set.insert("version", 400u32);
        let encoded = set.encode().unwrap();
        for cut in 0..encoded.len() {
            assert!(matches!(
                RecordSet::decode(&encoded[..cut]),
                Err(ProtocolError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_decode_duplicate_last_wins() {
        let mut raw = 2u32.to_be_bytes().to_vec();
        field(&mut raw, "error", TYPE_INT, 1);
        raw.extend_from_slice(&1u32.to_be_bytes());
        field(&mut raw, "error", TYPE_INT, 1);
        raw.extend_from_slice(&9u32.to_be_bytes());

        let set = RecordSet::decode(&raw).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("error"), Some(&WireValue::UInt32(9)));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut raw = 1u32.to_be_bytes().to_vec();
        field(&mut raw, "x", 5, 1);
        assert_eq!(RecordSet::decode(&raw), Err(ProtocolError::UnknownType(5)));
    }

    #[test]
    fn test_encode_rejects() {
        let mut set = RecordSet::new();
        set.insert_opt("client_str", None);
        assert_eq!(
            set.encode(),
            Err(ProtocolError::NilValue("client_str".to_string()))
        );

        let mut set = RecordSet::new();
        set.insert("timestamp", 1u64 << 40);
        assert_eq!(
            set.encode(),
            Err(ProtocolError::UnsupportedType("timestamp".to_string()))
        );

        let mut set = RecordSet::new();
        set.insert("", 1u32);
        assert_eq!(set.encode(), Err(ProtocolError::EmptyName));
    }

    fn wire_value() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            any::<u32>().prop_map(WireValue::UInt32),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(WireValue::from),
            ".{0,32}".prop_map(WireValue::Text),
        ]
    }

    proptest! {
        #[test]
        fn record_set_round_trip(
            fields in proptest::collection::btree_map("[a-z_]{1,16}", wire_value(), 0..8)
        ) {
            let mut set = RecordSet::new();
            for (name, value) in fields {
                set.insert(name, value);
            }
            let encoded = set.encode().unwrap();
            prop_assert_eq!(RecordSet::decode(&encoded).unwrap(), set);
        }

        #[test]
        fn decode_arbitrary_bytes_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = RecordSet::decode(&data);
        }
    }
}
