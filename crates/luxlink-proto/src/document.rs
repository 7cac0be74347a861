use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};

/// Protocol key carrying the message type. Always the first entry.
pub const KEY_MSG_TYPE: &str = "mt";

/// Protocol key carrying the capture-time timestamp in microseconds.
pub const KEY_TIMESTAMP: &str = "now_us";

/// Protocol key carrying the magic sentinel. Always the last entry.
pub const KEY_MAGIC: &str = "ma";

/// Magic sentinel value: "LX" (0x4C 0x58).
///
/// The wire format carries no explicit terminator; a message is complete
/// only when exactly the declared payload length was consumed and this
/// trailer value decoded intact.
pub const MAGIC: u16 = 0x4C58;

const MAX_KEY_LEN: usize = 255;
const MAX_VALUE_LEN: usize = u16::MAX as usize;

const TAG_STR: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_BYTES: u8 = 5;

/// A single document value. Closed set; the protocol has no nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bytes(Bytes),
}

impl Value {
    /// Borrow the string content, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Signed integer content, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Unsigned integer content, if this is a `Uint`.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the byte content, if this is a `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Str(_) => TAG_STR,
            Value::Int(_) => TAG_INT,
            Value::Uint(_) => TAG_UINT,
            Value::Float(_) => TAG_FLOAT,
            Value::Bytes(_) => TAG_BYTES,
        }
    }

    /// Encoded size of the value body (excluding key and tag).
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Str(s) => 2 + s.len(),
            Value::Bytes(b) => 2 + b.len(),
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => 8,
        }
    }
}

/// An ordered key/value document plus the protocol fields the codec
/// manages (`mt` first, `now_us` and `ma` appended at serialize time).
///
/// Constructed empty, populated via the typed `push_*` adds, serialized
/// once per send. On receive it is decoded in place: the same `Message`
/// is cleared and refilled for every incoming payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    entries: Vec<(String, Value)>,
}

impl Message {
    /// Create a message with the given type as its first entry.
    pub fn new(msg_type: &str) -> Self {
        let mut msg = Self::empty();
        msg.entries
            .push((KEY_MSG_TYPE.to_string(), Value::Str(msg_type.to_string())));
        msg
    }

    /// Create an empty message, typically as a reusable decode target.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Drop all entries, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Reset to a fresh message of the given type, reusing the allocation.
    pub fn reset(&mut self, msg_type: &str) {
        self.entries.clear();
        self.entries
            .push((KEY_MSG_TYPE.to_string(), Value::Str(msg_type.to_string())));
    }

    /// Append a string entry.
    pub fn push_str(&mut self, key: &str, value: &str) -> &mut Self {
        self.push(key, Value::Str(value.to_string()))
    }

    /// Append a signed integer entry.
    pub fn push_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.push(key, Value::Int(value))
    }

    /// Append an unsigned integer entry.
    pub fn push_uint(&mut self, key: &str, value: u64) -> &mut Self {
        self.push(key, Value::Uint(value))
    }

    /// Append a float entry.
    pub fn push_float(&mut self, key: &str, value: f64) -> &mut Self {
        self.push(key, Value::Float(value))
    }

    /// Append a byte-string entry.
    pub fn push_bytes(&mut self, key: &str, value: impl Into<Bytes>) -> &mut Self {
        self.push(key, Value::Bytes(value.into()))
    }

    fn push(&mut self, key: &str, value: Value) -> &mut Self {
        self.entries.push((key.to_string(), value));
        self
    }

    pub(crate) fn push_owned(&mut self, key: String, value: Value) {
        self.entries.push((key, value));
    }

    /// First value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// The message type (`mt` entry), if present.
    pub fn msg_type(&self) -> Option<&str> {
        self.get(KEY_MSG_TYPE).and_then(Value::as_str)
    }

    /// The capture timestamp (`now_us` entry), if present.
    pub fn now_us(&self) -> Option<i64> {
        self.get(KEY_TIMESTAMP).and_then(Value::as_int)
    }

    /// All entries in insertion/wire order.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Encoded payload size of all current entries.
    pub fn encoded_len(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| 2 + k.len() + v.encoded_len())
            .sum()
    }
}

/// Encode one entry into `dst`.
///
/// Entry layout: `key_len (u8) | key | tag (u8) | value`. Strings and
/// byte-strings carry a 2-byte big-endian length; integers and floats
/// are fixed 8 bytes big-endian.
pub(crate) fn write_entry(dst: &mut BytesMut, key: &str, value: &Value) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(CodecError::Malformed("invalid key length"));
    }
    dst.put_u8(key.len() as u8);
    dst.put_slice(key.as_bytes());
    dst.put_u8(value.tag());
    match value {
        Value::Str(s) => {
            if s.len() > MAX_VALUE_LEN {
                return Err(CodecError::Malformed("string value too long"));
            }
            dst.put_u16(s.len() as u16);
            dst.put_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            if b.len() > MAX_VALUE_LEN {
                return Err(CodecError::Malformed("byte value too long"));
            }
            dst.put_u16(b.len() as u16);
            dst.put_slice(b);
        }
        Value::Int(v) => dst.put_i64(*v),
        Value::Uint(v) => dst.put_u64(*v),
        Value::Float(v) => dst.put_f64(*v),
    }
    Ok(())
}

/// Decode one entry from `src`, or fail with `Malformed` on truncation
/// or an unknown tag.
pub(crate) fn read_entry(src: &mut Bytes) -> Result<(String, Value)> {
    if src.remaining() < 1 {
        return Err(CodecError::Malformed("truncated entry key length"));
    }
    let key_len = src.get_u8() as usize;
    if key_len == 0 || src.remaining() < key_len + 1 {
        return Err(CodecError::Malformed("truncated entry key"));
    }
    let key_bytes = src.split_to(key_len);
    let key = std::str::from_utf8(&key_bytes)
        .map_err(|_| CodecError::Malformed("entry key is not UTF-8"))?
        .to_string();

    let tag = src.get_u8();
    let value = match tag {
        TAG_STR | TAG_BYTES => {
            if src.remaining() < 2 {
                return Err(CodecError::Malformed("truncated value length"));
            }
            let len = src.get_u16() as usize;
            if src.remaining() < len {
                return Err(CodecError::Malformed("truncated value body"));
            }
            let body = src.split_to(len);
            if tag == TAG_STR {
                let s = std::str::from_utf8(&body)
                    .map_err(|_| CodecError::Malformed("string value is not UTF-8"))?;
                Value::Str(s.to_string())
            } else {
                Value::Bytes(body)
            }
        }
        TAG_INT => {
            if src.remaining() < 8 {
                return Err(CodecError::Malformed("truncated integer value"));
            }
            Value::Int(src.get_i64())
        }
        TAG_UINT => {
            if src.remaining() < 8 {
                return Err(CodecError::Malformed("truncated integer value"));
            }
            Value::Uint(src.get_u64())
        }
        TAG_FLOAT => {
            if src.remaining() < 8 {
                return Err(CodecError::Malformed("truncated float value"));
            }
            Value::Float(src.get_f64())
        }
        _ => return Err(CodecError::Malformed("unknown value tag")),
    };
    Ok((key, value))
}
