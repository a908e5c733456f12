//! The bencode codec used by torrent descriptors and tracker replies.
//!
//! A value is one of four variants, dispatched by its first byte:
//!
//! ```txt
//! i<digits>e          integer, 64-bit signed
//! <len>:<bytes>       byte string, not necessarily UTF-8
//! l<values>e          list
//! d<key><value>...e   dictionary, keys are byte strings
//! ```
//!
//! Dictionaries are kept in a [`BTreeMap`] so that encoding always emits
//! keys in ascending raw byte order, no matter the order they were built
//! in. This canonical form is what makes the info hash reproducible across
//! implementations that round-trip the `info` dictionary.

use std::collections::BTreeMap;

use crate::error::bencode::{BencodeError, Result};

/// A decoded bencode document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Returns the integer value, or `None` for any other variant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the raw bytes of a string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns a string value as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in a dictionary value.
    ///
    /// Returns `None` both when `self` is not a dictionary and when the key
    /// is absent; callers that must distinguish "absent" from "present but
    /// wrong type" match on the returned value.
    pub fn lookup(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Encodes the value into its canonical bencode form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Integer(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Value::Bytes(bytes) => {
                buf.extend_from_slice(bytes.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(bytes);
            }
            Value::List(items) => {
                buf.push(b'l');
                for item in items {
                    item.encode_into(buf);
                }
                buf.push(b'e');
            }
            Value::Dict(entries) => {
                buf.push(b'd');
                // BTreeMap iterates keys in ascending byte order
                for (key, value) in entries {
                    buf.extend_from_slice(key.len().to_string().as_bytes());
                    buf.push(b':');
                    buf.extend_from_slice(key);
                    value.encode_into(buf);
                }
                buf.push(b'e');
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

/// Decodes exactly one value from the buffer.
///
/// Trailing bytes after the value are rejected: partial or garbage-appended
/// input must fail rather than be silently truncated.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut parser = Parser { buf: bytes, pos: 0 };
    let value = parser.parse_value()?;
    let rest = parser.buf.len() - parser.pos;
    if rest != 0 {
        return Err(BencodeError::TrailingBytes(rest));
    }
    Ok(value)
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn bump(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.peek()? {
            b'i' => self.parse_integer(),
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            b'0'..=b'9' => Ok(Value::Bytes(self.parse_string()?)),
            byte => Err(BencodeError::UnexpectedByte {
                byte,
                pos: self.pos,
            }),
        }
    }

    /// `i` + optional sign + digits + `e`. No leading zero except the
    /// literal `0`, and no `-0`.
    fn parse_integer(&mut self) -> Result<Value> {
        let start = self.pos;
        self.bump()?;

        let negative = self.peek()? == b'-';
        if negative {
            self.bump()?;
        }

        let digits_start = self.pos;
        while self.peek()?.is_ascii_digit() {
            self.pos += 1;
        }
        let digits = &self.buf[digits_start..self.pos];

        if self.bump()? != b'e' {
            return Err(BencodeError::InvalidInteger(start));
        }
        match digits {
            [] => return Err(BencodeError::InvalidInteger(start)),
            [b'0'] if negative => return Err(BencodeError::InvalidInteger(start)),
            [b'0', _, ..] => return Err(BencodeError::InvalidInteger(start)),
            _ => {}
        }

        let literal = std::str::from_utf8(&self.buf[start + 1..self.pos - 1])
            .expect("integer literal is ascii");
        let value = literal
            .parse()
            .map_err(|_| BencodeError::IntegerOverflow(start))?;
        Ok(Value::Integer(value))
    }

    /// ASCII decimal length + `:` + exactly that many raw bytes.
    fn parse_string(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        while self.peek()?.is_ascii_digit() {
            self.pos += 1;
        }
        let len: usize = std::str::from_utf8(&self.buf[start..self.pos])
            .expect("length prefix is ascii")
            .parse()
            .map_err(|_| BencodeError::InvalidLength(start))?;

        if self.bump()? != b':' {
            return Err(BencodeError::InvalidLength(start));
        }

        let available = self.buf.len() - self.pos;
        if available < len {
            return Err(BencodeError::TruncatedString {
                declared: len,
                available,
            });
        }
        let bytes = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn parse_list(&mut self) -> Result<Value> {
        self.bump()?;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.parse_value()?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn parse_dict(&mut self) -> Result<Value> {
        self.bump()?;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            let key_pos = self.pos;
            let key = match self.parse_value()? {
                Value::Bytes(key) => key,
                _ => return Err(BencodeError::NonStringKey(key_pos)),
            };
            let value = self.parse_value()?;
            // a duplicate key: the last occurrence wins
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn dict(entries: Vec<(&str, Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v))
                .collect(),
        )
    }

    #[test]
    fn decodes_scalars() {
        assert_eq!(decode(b"i42e"), Ok(Value::Integer(42)));
        assert_eq!(decode(b"i0e"), Ok(Value::Integer(0)));
        assert_eq!(decode(b"i-5e"), Ok(Value::Integer(-5)));
        assert_eq!(decode(b"4:spam"), Ok(Value::from("spam")));
        assert_eq!(decode(b"0:"), Ok(Value::from("")));
    }

    #[test]
    fn rejects_malformed_integers() {
        assert_eq!(decode(b"i01e"), Err(BencodeError::InvalidInteger(0)));
        assert_eq!(decode(b"i-0e"), Err(BencodeError::InvalidInteger(0)));
        assert_eq!(decode(b"ie"), Err(BencodeError::InvalidInteger(0)));
        assert_eq!(decode(b"i-e"), Err(BencodeError::InvalidInteger(0)));
        assert_eq!(decode(b"i12x4e"), Err(BencodeError::InvalidInteger(0)));
        assert_eq!(
            decode(b"i99999999999999999999e"),
            Err(BencodeError::IntegerOverflow(0))
        );
    }

    #[test]
    fn rejects_truncated_string() {
        assert_eq!(
            decode(b"5:ab"),
            Err(BencodeError::TruncatedString {
                declared: 5,
                available: 2
            })
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert_eq!(decode(b"i42eextra"), Err(BencodeError::TrailingBytes(5)));
        assert_eq!(decode(b"4:spam!"), Err(BencodeError::TrailingBytes(1)));
    }

    #[test]
    fn rejects_unknown_lookahead() {
        assert_eq!(
            decode(b"x"),
            Err(BencodeError::UnexpectedByte { byte: b'x', pos: 0 })
        );
    }

    #[test]
    fn rejects_non_string_dict_key() {
        assert_eq!(decode(b"di1e4:spame"), Err(BencodeError::NonStringKey(1)));
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let decoded = decode(b"d3:fooi1e3:fooi2ee").unwrap();
        assert_eq!(decoded.lookup(b"foo"), Some(&Value::Integer(2)));
    }

    #[test]
    fn decodes_nested_structures() {
        let decoded = decode(b"d4:spaml4:spami42eee").unwrap();
        let expected = dict(vec![(
            "spam",
            Value::List(vec![Value::from("spam"), Value::Integer(42)]),
        )]);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn encodes_canonically_regardless_of_insertion_order() {
        let forward = dict(vec![
            ("alpha", Value::Integer(1)),
            ("beta", Value::Integer(2)),
            ("gamma", Value::Integer(3)),
        ]);
        let reverse = dict(vec![
            ("gamma", Value::Integer(3)),
            ("beta", Value::Integer(2)),
            ("alpha", Value::Integer(1)),
        ]);
        assert_eq!(forward.encode(), reverse.encode());
        assert_eq!(forward.encode(), b"d5:alphai1e4:betai2e5:gammai3ee");
    }

    #[test]
    fn round_trips() {
        let value = dict(vec![
            ("announce", Value::from("http://tracker.local/announce")),
            (
                "info",
                dict(vec![
                    ("length", Value::Integer(425984)),
                    ("name", Value::from("river.iso")),
                    ("piece length", Value::Integer(262144)),
                    ("pieces", Value::Bytes(vec![0xab; 40])),
                ]),
            ),
        ]);
        let encoded = value.encode();
        assert_eq!(decode(&encoded).unwrap(), value);
        // a conforming encoder's output decodes back to itself byte for byte
        assert_eq!(decode(&encoded).unwrap().encode(), encoded);
    }

    #[test]
    fn bytes_are_not_utf8_converted() {
        let raw = [0xff, 0x00, 0xfe];
        let mut encoded = b"3:".to_vec();
        encoded.extend_from_slice(&raw);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.as_bytes(), Some(&raw[..]));
        assert_eq!(decoded.as_str(), None);
    }
}
