//! Binary wire format for log records.
//!
//! Every record starts with a 6-byte prefix: the `ZLOG` magic tag (4 bytes),
//! the protocol version (1 byte) and the level (1 byte). Two layouts follow
//! the prefix:
//!
//! ```text
//! Basic (16-byte header)
//!   0       4    5     6            14          16
//!   | magic | ver | lvl | timestamp | msg_len:u16 | message ...
//!
//! Structured (22-byte header)
//!   0       4    5     6           14          22          23
//!   | magic | ver | lvl | sequence | timestamp | msg_len:u8 | message
//!   | field_count:u8 | fields ...
//!
//! Field
//!   | key_len:u8 | key | type:u8 | value
//!   value = 8 bytes (Int, Uint, Bool, Float64), 4 bytes (Float32),
//!           len:u16 + bytes (String, Bytes)
//! ```
//!
//! Header integers (magic, sequence, timestamp, basic message length) are
//! little-endian. Field values are big-endian.
//!
//! Version 1 records carry no layout tag, so [`decode`] has to guess the
//! layout (see [`decode`] for the exact order). Version 2 records put a
//! discriminant byte at offset 6 and shift the rest of the header by one.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

/// Magic tag, "ZLOG".
pub const MAGIC: u32 = 0x5A4C_4F47;

/// Magic tag as it appears on the wire.
pub const MAGIC_BYTES: [u8; 4] = MAGIC.to_le_bytes();

/// Untagged layouts, detected heuristically.
pub const VERSION_1: u8 = 1;

/// Layout discriminant at offset 6.
pub const VERSION_2: u8 = 2;

pub const PREFIX_SIZE: usize = 6;
pub const BASIC_HEADER_SIZE: usize = 16;
pub const STRUCTURED_HEADER_SIZE: usize = 22;

/// Longest message in the structured layout.
pub const MAX_MESSAGE_LEN: usize = u8::MAX as usize;
/// Longest message in the basic layout.
pub const MAX_BASIC_MESSAGE_LEN: usize = u16::MAX as usize;
pub const MAX_KEY_LEN: usize = u8::MAX as usize;
pub const MAX_FIELDS: usize = u8::MAX as usize;
/// Longest String or Bytes field value.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

const LAYOUT_TAG_BASIC: u8 = 0;
const LAYOUT_TAG_STRUCTURED: u8 = 1;

/// Record severity.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Fatal,
    ];

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Wire tag of a field value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int = 0,
    Uint = 1,
    Float32 = 2,
    Float64 = 3,
    String = 4,
    Bool = 5,
    Bytes = 6,
}

impl FieldType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FieldType::Int),
            1 => Some(FieldType::Uint),
            2 => Some(FieldType::Float32),
            3 => Some(FieldType::Float64),
            4 => Some(FieldType::String),
            5 => Some(FieldType::Bool),
            6 => Some(FieldType::Bytes),
            _ => None,
        }
    }
}

/// A typed field value. Borrowed, so building fields never allocates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Int(i64),
    Uint(u64),
    Float32(f32),
    Float64(f64),
    Str(&'a str),
    Bool(bool),
    Bytes(&'a [u8]),
}

impl Value<'_> {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Int(_) => FieldType::Int,
            Value::Uint(_) => FieldType::Uint,
            Value::Float32(_) => FieldType::Float32,
            Value::Float64(_) => FieldType::Float64,
            Value::Str(_) => FieldType::String,
            Value::Bool(_) => FieldType::Bool,
            Value::Bytes(_) => FieldType::Bytes,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value<'_> {
                fn from(v: $ty) -> Self {
                    Value::$variant(v as $conv)
                }
            }
        )*
    };
}

value_from! {
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    isize => Int as i64,
    u8 => Uint as u64,
    u16 => Uint as u64,
    u32 => Uint as u64,
    u64 => Uint as u64,
    usize => Uint as u64,
    f32 => Float32 as f32,
    f64 => Float64 as f64,
}

impl From<bool> for Value<'_> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Str(v)
    }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(v: &'a [u8]) -> Self {
        Value::Bytes(v)
    }
}

/// A key/value pair attached to a structured record.
///
/// # Examples
///
/// ```
/// # use zlog::wire::{Field, Value};
/// let fields = [
///     Field::string("user", "alice"),
///     Field::int("attempt", 3),
///     Field::new("ratio", 0.75f64),
/// ];
/// assert_eq!(fields[2].value, Value::Float64(0.75));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field<'a> {
    pub key: &'a str,
    pub value: Value<'a>,
}

impl<'a> Field<'a> {
    /// Creates a field from anything convertible into a [`Value`].
    ///
    /// Integers widen to 64 bits, keeping their signedness; `&str` becomes a
    /// String value and `&[u8]` a Bytes value.
    ///
    /// # Arguments
    ///
    /// * `key` - Field name, truncated to 255 bytes when encoded
    /// * `value` - Field value
    pub fn new(key: &'a str, value: impl Into<Value<'a>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Signed integer field.
    pub fn int(key: &'a str, value: i64) -> Self {
        Self::new(key, Value::Int(value))
    }

    /// Unsigned integer field.
    pub fn uint(key: &'a str, value: u64) -> Self {
        Self::new(key, Value::Uint(value))
    }

    pub fn float32(key: &'a str, value: f32) -> Self {
        Self::new(key, Value::Float32(value))
    }

    pub fn float64(key: &'a str, value: f64) -> Self {
        Self::new(key, Value::Float64(value))
    }

    /// Text field. Values over 65535 bytes are cut on a character boundary.
    pub fn string(key: &'a str, value: &'a str) -> Self {
        Self::new(key, Value::Str(value))
    }

    /// Boolean field, stored on the wire as an 8-byte 0 or 1.
    pub fn bool(key: &'a str, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    /// Raw bytes field. Values over 65535 bytes are truncated.
    pub fn bytes(key: &'a str, value: &'a [u8]) -> Self {
        Self::new(key, Value::Bytes(value))
    }
}

/// Which header layout a record uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Basic,
    Structured,
}

/// Protocol revision written by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Untagged layouts. Readable by every existing decoder.
    #[default]
    V1,
    /// Explicit layout discriminant after the prefix.
    V2,
}

impl ProtocolVersion {
    pub fn byte(self) -> u8 {
        match self {
            ProtocolVersion::V1 => VERSION_1,
            ProtocolVersion::V2 => VERSION_2,
        }
    }

    /// Bytes the version adds in front of the layout-specific header.
    fn shift(self) -> usize {
        match self {
            ProtocolVersion::V1 => 0,
            ProtocolVersion::V2 => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes one version 1 record into a fresh buffer.
///
/// The structured layout is used when a sequence number is given or `fields`
/// is non-empty; otherwise the record is basic. A structured record without a
/// sequence carries sequence 0.
///
/// Oversized input is truncated, never rejected: messages to 255 bytes
/// (structured) or 65535 bytes (basic), keys to 255 bytes, String and Bytes
/// values to 65535 bytes, and only the first 255 fields are kept. Text is cut
/// on a UTF-8 character boundary.
///
/// # Examples
///
/// ```
/// # use zlog::wire::{self, Field, Layout, Level};
/// let bytes = wire::encode(Level::Info, Some(7), 1_700_000_000_000_000_000,
///                          "user login", &[Field::string("user", "alice")]);
/// let record = wire::decode(&bytes).unwrap();
/// assert_eq!(record.layout, Layout::Structured);
/// assert_eq!(record.sequence, Some(7));
/// assert_eq!(record.message, b"user login");
/// ```
pub fn encode(
    level: Level,
    sequence: Option<u64>,
    timestamp: u64,
    message: &str,
    fields: &[Field<'_>],
) -> Vec<u8> {
    let layout = layout_for(sequence, fields);
    let mut out = Vec::with_capacity(encoded_size(ProtocolVersion::V1, layout, message, fields));
    encode_into(&mut out, level, sequence, timestamp, message, fields);
    out
}

/// Appends one version 1 record to `out` and reports the layout chosen.
pub fn encode_into(
    out: &mut Vec<u8>,
    level: Level,
    sequence: Option<u64>,
    timestamp: u64,
    message: &str,
    fields: &[Field<'_>],
) -> Layout {
    match layout_for(sequence, fields) {
        Layout::Basic => {
            encode_basic_into(out, ProtocolVersion::V1, level, timestamp, message);
            Layout::Basic
        }
        Layout::Structured => {
            encode_structured_into(
                out,
                ProtocolVersion::V1,
                level,
                sequence.unwrap_or(0),
                timestamp,
                message,
                fields,
            );
            Layout::Structured
        }
    }
}

fn layout_for(sequence: Option<u64>, fields: &[Field<'_>]) -> Layout {
    if sequence.is_some() || !fields.is_empty() {
        Layout::Structured
    } else {
        Layout::Basic
    }
}

/// Appends a basic record.
pub fn encode_basic_into(
    out: &mut Vec<u8>,
    version: ProtocolVersion,
    level: Level,
    timestamp: u64,
    message: &str,
) {
    let message = truncate_str(message, MAX_BASIC_MESSAGE_LEN);
    write_prefix(out, version, level, Layout::Basic);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&(message.len() as u16).to_le_bytes());
    out.extend_from_slice(message.as_bytes());
}

/// Appends a structured record.
pub fn encode_structured_into(
    out: &mut Vec<u8>,
    version: ProtocolVersion,
    level: Level,
    sequence: u64,
    timestamp: u64,
    message: &str,
    fields: &[Field<'_>],
) {
    let message = truncate_str(message, MAX_MESSAGE_LEN);
    let fields = &fields[..fields.len().min(MAX_FIELDS)];

    write_prefix(out, version, level, Layout::Structured);
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(message.len() as u8);
    out.extend_from_slice(message.as_bytes());
    out.push(fields.len() as u8);
    for field in fields {
        write_field(out, field);
    }
}

/// Exact number of bytes the record will occupy, after truncation.
pub fn encoded_size(
    version: ProtocolVersion,
    layout: Layout,
    message: &str,
    fields: &[Field<'_>],
) -> usize {
    match layout {
        Layout::Basic => {
            version.shift()
                + BASIC_HEADER_SIZE
                + truncate_str(message, MAX_BASIC_MESSAGE_LEN).len()
        }
        Layout::Structured => {
            let fields_size: usize = fields
                .iter()
                .take(MAX_FIELDS)
                .map(field_size)
                .sum();
            version.shift()
                + STRUCTURED_HEADER_SIZE
                + 1
                + truncate_str(message, MAX_MESSAGE_LEN).len()
                + 1
                + fields_size
        }
    }
}

fn field_size(field: &Field<'_>) -> usize {
    let value = match field.value {
        Value::Int(_) | Value::Uint(_) | Value::Bool(_) | Value::Float64(_) => 8,
        Value::Float32(_) => 4,
        Value::Str(s) => 2 + truncate_str(s, MAX_VALUE_LEN).len(),
        Value::Bytes(b) => 2 + b.len().min(MAX_VALUE_LEN),
    };
    1 + truncate_str(field.key, MAX_KEY_LEN).len() + 1 + value
}

fn write_prefix(out: &mut Vec<u8>, version: ProtocolVersion, level: Level, layout: Layout) {
    out.extend_from_slice(&MAGIC_BYTES);
    out.push(version.byte());
    out.push(level as u8);
    if version == ProtocolVersion::V2 {
        out.push(match layout {
            Layout::Basic => LAYOUT_TAG_BASIC,
            Layout::Structured => LAYOUT_TAG_STRUCTURED,
        });
    }
}

fn write_field(out: &mut Vec<u8>, field: &Field<'_>) {
    let key = truncate_str(field.key, MAX_KEY_LEN);
    out.push(key.len() as u8);
    out.extend_from_slice(key.as_bytes());
    out.push(field.value.field_type() as u8);

    match field.value {
        Value::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Uint(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Bool(v) => out.extend_from_slice(&u64::from(v).to_be_bytes()),
        Value::Float32(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        Value::Float64(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        Value::Str(s) => write_blob(out, truncate_str(s, MAX_VALUE_LEN).as_bytes()),
        Value::Bytes(b) => write_blob(out, &b[..b.len().min(MAX_VALUE_LEN)]),
    }
}

fn write_blob(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A decoded record, borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    pub version: u8,
    pub layout: Layout,
    /// Raw level byte; see [`Record::level`].
    pub level: u8,
    pub sequence: Option<u64>,
    pub timestamp: u64,
    pub message: &'a [u8],
    pub fields: Vec<DecodedField<'a>>,
    /// Bytes of the input this record spans.
    pub encoded_len: usize,
}

impl<'a> Record<'a> {
    /// The level, if the byte names a known one.
    pub fn level(&self) -> Option<Level> {
        Level::from_u8(self.level)
    }

    pub fn message_str(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField<'a> {
    pub key: &'a [u8],
    /// Raw type byte as found on the wire.
    pub type_tag: u8,
    pub value: DecodedValue<'a>,
}

impl<'a> DecodedField<'a> {
    pub fn key_str(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.key)
    }

    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_u8(self.type_tag)
    }
}

/// A field value read back from the wire.
///
/// `Truncated` stands in for a value whose declared length runs past the end
/// of the buffer. `Unknown` marks a type byte the decoder does not know; field
/// decoding stops after it because the value width cannot be known.
#[derive(Debug, Clone, Copy)]
pub enum DecodedValue<'a> {
    Int(i64),
    Uint(u64),
    Float32(f32),
    Float64(f64),
    Str(&'a [u8]),
    Bool(bool),
    Bytes(&'a [u8]),
    Truncated,
    Unknown,
}

impl DecodedValue<'_> {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, DecodedValue::Truncated | DecodedValue::Unknown)
    }
}

/// Floats compare by bit pattern so NaN payloads survive equality checks.
impl PartialEq for DecodedValue<'_> {
    fn eq(&self, other: &Self) -> bool {
        use DecodedValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Float32(a), Float32(b)) => a.to_bits() == b.to_bits(),
            (Float64(a), Float64(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Truncated, Truncated) | (Unknown, Unknown) => true,
            _ => false,
        }
    }
}

impl PartialEq<Value<'_>> for DecodedValue<'_> {
    fn eq(&self, other: &Value<'_>) -> bool {
        match (self, *other) {
            (DecodedValue::Int(a), Value::Int(b)) => *a == b,
            (DecodedValue::Uint(a), Value::Uint(b)) => *a == b,
            (DecodedValue::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (DecodedValue::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (DecodedValue::Str(a), Value::Str(b)) => *a == b.as_bytes(),
            (DecodedValue::Bool(a), Value::Bool(b)) => *a == b,
            (DecodedValue::Bytes(a), Value::Bytes(b)) => *a == b,
            _ => false,
        }
    }
}

/// Decodes the record at the start of `buf`.
///
/// Bytes after the record are ignored; `encoded_len` says where it ended.
///
/// Version 1 layouts are not tagged, so the layout is inferred in this order:
///
/// 1. fewer than 16 bytes: [`Error::Truncated`];
/// 2. wrong magic: [`Error::InvalidMagic`];
/// 3. the u16 at offset 14 is read as a basic message length; if it is
///    non-zero and the buffer holds that many message bytes, the record is
///    basic;
/// 4. otherwise, with at least 23 bytes, the byte at offset 22 is read as a
///    structured message length; if the message fits the record is
///    structured, else [`Error::AmbiguousHeader`];
/// 5. otherwise [`Error::Truncated`].
///
/// Step 3 runs first, so a structured record whose timestamp's low two bytes
/// (offsets 14 and 15) look like a short enough length is read as basic. An
/// empty basic message always falls through to step 4. Version 2 records name
/// their layout and skip the guesswork. Inside a stream the guess is checked
/// against record boundaries by [`RecordReader`](crate::RecordReader).
///
/// Malformed field data never fails the record: see [`DecodedValue`].
pub fn decode(buf: &[u8]) -> Result<Record<'_>> {
    check_prefix(buf)?;
    match buf[4] {
        VERSION_2 => decode_tagged(buf),
        _ => decode_untagged(buf),
    }
}

/// Decodes the record at the start of `buf` as the given layout instead of
/// guessing it.
///
/// Only version 1 records are affected; version 2 records always decode as
/// the layout they name. Callers that know where a record ends, such as a
/// reader that can see the next magic tag, use this to check the alternative
/// the version 1 guess did not take.
///
/// # Arguments
///
/// * `buf` - Bytes starting at a record's magic tag
/// * `layout` - Layout to assume for a version 1 record
///
/// # Examples
///
/// ```
/// # use zlog::wire::{self, Field, Layout, Level};
/// // Low timestamp bytes of 5 make the guess pick the basic layout.
/// let bytes = wire::encode(Level::Info, Some(1), 5, "order", &[Field::uint("id", 7)]);
/// assert_eq!(wire::decode(&bytes).unwrap().layout, Layout::Basic);
///
/// let record = wire::decode_as(&bytes, Layout::Structured).unwrap();
/// assert_eq!(record.sequence, Some(1));
/// assert_eq!(record.encoded_len, bytes.len());
/// ```
pub fn decode_as(buf: &[u8], layout: Layout) -> Result<Record<'_>> {
    check_prefix(buf)?;
    if buf[4] == VERSION_2 {
        return decode_tagged(buf);
    }

    let (header, msg_len) = match layout {
        Layout::Basic => (
            BASIC_HEADER_SIZE,
            read_u16_le(buf, 14).unwrap_or(0) as usize,
        ),
        Layout::Structured => {
            let header = STRUCTURED_HEADER_SIZE + 1;
            match buf.get(STRUCTURED_HEADER_SIZE) {
                Some(&len) => (header, len as usize),
                None => {
                    return Err(Error::Truncated {
                        needed: header,
                        available: buf.len(),
                    })
                }
            }
        }
    };
    if buf.len() < header + msg_len {
        return Err(Error::Truncated {
            needed: header + msg_len,
            available: buf.len(),
        });
    }

    Ok(match layout {
        Layout::Basic => decode_basic(buf, 0),
        Layout::Structured => decode_structured(buf, 0),
    })
}

fn check_prefix(buf: &[u8]) -> Result<()> {
    if buf.len() < BASIC_HEADER_SIZE {
        return Err(Error::Truncated {
            needed: BASIC_HEADER_SIZE,
            available: buf.len(),
        });
    }
    if buf[..4] != MAGIC_BYTES {
        return Err(Error::InvalidMagic);
    }
    Ok(())
}

fn decode_untagged(buf: &[u8]) -> Result<Record<'_>> {
    let candidate = read_u16_le(buf, 14).unwrap_or(0) as usize;
    if candidate > 0 && buf.len() >= BASIC_HEADER_SIZE + candidate {
        return Ok(decode_basic(buf, 0));
    }

    let min_structured = STRUCTURED_HEADER_SIZE + 1;
    if buf.len() >= min_structured {
        let msg_len = buf[STRUCTURED_HEADER_SIZE] as usize;
        if buf.len() >= min_structured + msg_len {
            return Ok(decode_structured(buf, 0));
        }
        return Err(Error::AmbiguousHeader);
    }

    Err(Error::Truncated {
        needed: min_structured,
        available: buf.len(),
    })
}

fn decode_tagged(buf: &[u8]) -> Result<Record<'_>> {
    let shift = ProtocolVersion::V2.shift();
    match buf[PREFIX_SIZE] {
        LAYOUT_TAG_BASIC => {
            let header = shift + BASIC_HEADER_SIZE;
            if buf.len() < header {
                return Err(Error::Truncated {
                    needed: header,
                    available: buf.len(),
                });
            }
            let msg_len = read_u16_le(buf, shift + 14).unwrap_or(0) as usize;
            if buf.len() < header + msg_len {
                return Err(Error::Truncated {
                    needed: header + msg_len,
                    available: buf.len(),
                });
            }
            Ok(decode_basic(buf, shift))
        }
        LAYOUT_TAG_STRUCTURED => {
            let header = shift + STRUCTURED_HEADER_SIZE + 1;
            if buf.len() < header {
                return Err(Error::Truncated {
                    needed: header,
                    available: buf.len(),
                });
            }
            let msg_len = buf[header - 1] as usize;
            if buf.len() < header + msg_len {
                return Err(Error::Truncated {
                    needed: header + msg_len,
                    available: buf.len(),
                });
            }
            Ok(decode_structured(buf, shift))
        }
        _ => Err(Error::AmbiguousHeader),
    }
}

/// Caller has checked the header and message fit.
fn decode_basic(buf: &[u8], shift: usize) -> Record<'_> {
    let timestamp = read_u64_le(buf, shift + 6).unwrap_or(0);
    let msg_len = read_u16_le(buf, shift + 14).unwrap_or(0) as usize;
    let start = shift + BASIC_HEADER_SIZE;
    let end = (start + msg_len).min(buf.len());

    Record {
        version: buf[4],
        layout: Layout::Basic,
        level: buf[5],
        sequence: None,
        timestamp,
        message: &buf[start..end],
        fields: Vec::new(),
        encoded_len: end,
    }
}

/// Caller has checked the header and message fit.
fn decode_structured(buf: &[u8], shift: usize) -> Record<'_> {
    let sequence = read_u64_le(buf, shift + 6).unwrap_or(0);
    let timestamp = read_u64_le(buf, shift + 14).unwrap_or(0);
    let msg_len = buf[shift + STRUCTURED_HEADER_SIZE] as usize;
    let start = shift + STRUCTURED_HEADER_SIZE + 1;
    let end = (start + msg_len).min(buf.len());

    let (fields, encoded_len) = decode_fields(buf, end);

    Record {
        version: buf[4],
        layout: Layout::Structured,
        level: buf[5],
        sequence: Some(sequence),
        timestamp,
        message: &buf[start..end],
        fields,
        encoded_len,
    }
}

/// Reads the field block starting at `pos`. A record that ends right after
/// its message has no fields.
fn decode_fields(buf: &[u8], mut pos: usize) -> (Vec<DecodedField<'_>>, usize) {
    let mut fields = Vec::new();
    let Some(&count) = buf.get(pos) else {
        return (fields, pos);
    };
    pos += 1;

    for _ in 0..count {
        if pos >= buf.len() {
            break;
        }
        let key_len = buf[pos] as usize;
        pos += 1;
        let Some(key) = buf.get(pos..pos + key_len) else {
            pos = buf.len();
            break;
        };
        pos += key_len;

        let Some(&type_tag) = buf.get(pos) else {
            break;
        };
        pos += 1;

        let (value, width) = decode_value(buf, pos, type_tag);
        pos = pos.saturating_add(width);
        let unknown = matches!(value, DecodedValue::Unknown);
        fields.push(DecodedField {
            key,
            type_tag,
            value,
        });
        if unknown {
            break;
        }
    }

    (fields, pos.min(buf.len()))
}

/// Returns the value at `pos` and how far the cursor moves past it. When the
/// declared width runs past the buffer the value is `Truncated` and the
/// cursor still moves the declared width.
fn decode_value(buf: &[u8], pos: usize, type_tag: u8) -> (DecodedValue<'_>, usize) {
    let Some(field_type) = FieldType::from_u8(type_tag) else {
        return (DecodedValue::Unknown, 0);
    };

    match field_type {
        FieldType::Int => match read_array::<8>(buf, pos) {
            Some(b) => (DecodedValue::Int(i64::from_be_bytes(b)), 8),
            None => (DecodedValue::Truncated, 8),
        },
        FieldType::Uint => match read_array::<8>(buf, pos) {
            Some(b) => (DecodedValue::Uint(u64::from_be_bytes(b)), 8),
            None => (DecodedValue::Truncated, 8),
        },
        FieldType::Bool => match read_array::<8>(buf, pos) {
            Some(b) => (DecodedValue::Bool(u64::from_be_bytes(b) != 0), 8),
            None => (DecodedValue::Truncated, 8),
        },
        FieldType::Float32 => match read_array::<4>(buf, pos) {
            Some(b) => (DecodedValue::Float32(f32::from_bits(u32::from_be_bytes(b))), 4),
            None => (DecodedValue::Truncated, 4),
        },
        FieldType::Float64 => match read_array::<8>(buf, pos) {
            Some(b) => (DecodedValue::Float64(f64::from_bits(u64::from_be_bytes(b))), 8),
            None => (DecodedValue::Truncated, 8),
        },
        FieldType::String | FieldType::Bytes => {
            let Some(len) = read_array::<2>(buf, pos).map(u16::from_be_bytes) else {
                return (DecodedValue::Truncated, 2);
            };
            let width = 2 + len as usize;
            match buf.get(pos + 2..pos + width) {
                Some(data) if field_type == FieldType::String => (DecodedValue::Str(data), width),
                Some(data) => (DecodedValue::Bytes(data), width),
                None => (DecodedValue::Truncated, width),
            }
        }
    }
}

fn read_array<const N: usize>(buf: &[u8], pos: usize) -> Option<[u8; N]> {
    let end = pos.checked_add(N)?;
    buf.get(pos..end)?.try_into().ok()
}

fn read_u16_le(buf: &[u8], pos: usize) -> Option<u16> {
    read_array::<2>(buf, pos).map(u16::from_le_bytes)
}

fn read_u64_le(buf: &[u8], pos: usize) -> Option<u64> {
    read_array::<8>(buf, pos).map(u64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: u64 = 0x0102_0304_0506_0000;

    #[test]
    fn test_basic_layout_offsets() {
        let bytes = encode(Level::Warn, None, TS, "hi", &[]);
        assert_eq!(bytes.len(), BASIC_HEADER_SIZE + 2);
        assert_eq!(&bytes[0..4], &MAGIC_BYTES);
        assert_eq!(&bytes[0..4], b"GOLZ");
        assert_eq!(bytes[4], VERSION_1);
        assert_eq!(bytes[5], Level::Warn as u8);
        assert_eq!(&bytes[6..14], &TS.to_le_bytes());
        assert_eq!(&bytes[14..16], &2u16.to_le_bytes());
        assert_eq!(&bytes[16..], b"hi");
    }

    #[test]
    fn test_structured_layout_offsets() {
        let bytes = encode(Level::Info, Some(9), TS, "m", &[Field::int("k", -2)]);
        assert_eq!(&bytes[6..14], &9u64.to_le_bytes());
        assert_eq!(&bytes[14..22], &TS.to_le_bytes());
        assert_eq!(bytes[22], 1);
        assert_eq!(bytes[23], b'm');
        assert_eq!(bytes[24], 1, "field count");
        assert_eq!(bytes[25], 1, "key length");
        assert_eq!(bytes[26], b'k');
        assert_eq!(bytes[27], FieldType::Int as u8);
        assert_eq!(&bytes[28..36], &(-2i64).to_be_bytes());
        assert_eq!(bytes.len(), 36);
    }

    #[test]
    fn test_encoded_size_is_exact() {
        let blob = [7u8; 3];
        let fields = [
            Field::string("s", "text"),
            Field::bytes("b", &blob),
            Field::float32("f", 1.5),
            Field::bool("ok", true),
        ];
        for version in [ProtocolVersion::V1, ProtocolVersion::V2] {
            let mut out = Vec::new();
            encode_structured_into(&mut out, version, Level::Info, 1, TS, "msg", &fields);
            assert_eq!(out.len(), encoded_size(version, Layout::Structured, "msg", &fields));

            out.clear();
            encode_basic_into(&mut out, version, Level::Info, TS, "msg");
            assert_eq!(out.len(), encoded_size(version, Layout::Basic, "msg", &[]));
        }
    }

    #[test]
    fn test_structured_message_truncated() {
        let long = "x".repeat(300);
        let bytes = encode(Level::Info, Some(1), TS, &long, &[]);
        let record = decode(&bytes).unwrap();
        assert_eq!(record.message.len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_truncation_keeps_utf8() {
        // 127 two-byte chars = 254 bytes, plus one more would be 256.
        let text = "é".repeat(128);
        assert_eq!(truncate_str(&text, 255).len(), 254);
        assert_eq!(truncate_str("abc", 255), "abc");
    }

    #[test]
    fn test_field_count_capped() {
        let fields: Vec<Field<'_>> = (0..300).map(|i| Field::int("n", i)).collect();
        let bytes = encode(Level::Info, Some(1), TS, "many", &fields);
        let record = decode(&bytes).unwrap();
        assert_eq!(record.fields.len(), MAX_FIELDS);
        assert_eq!(record.encoded_len, bytes.len());
    }

    #[test]
    fn test_decode_short_and_bad_magic() {
        assert_eq!(
            decode(&[0u8; 3]),
            Err(Error::Truncated { needed: 16, available: 3 })
        );
        let mut bytes = encode(Level::Info, None, TS, "hello", &[]);
        bytes[0] ^= 0xFF;
        assert_eq!(decode(&bytes), Err(Error::InvalidMagic));
    }

    #[test]
    fn test_empty_basic_message_is_not_basic() {
        let bytes = encode(Level::Info, None, TS, "", &[]);
        assert_eq!(bytes.len(), 16);
        assert_eq!(
            decode(&bytes),
            Err(Error::Truncated { needed: 23, available: 16 })
        );
    }

    #[test]
    fn test_ambiguous_header() {
        // Offset 14 reads as a length that doesn't fit, offset 22 likewise.
        let mut bytes = encode(Level::Info, None, TS, "", &[]);
        bytes[14..16].copy_from_slice(&1000u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        bytes.push(200);
        assert_eq!(decode(&bytes), Err(Error::AmbiguousHeader));
    }

    #[test]
    fn test_truncated_value_uses_placeholder_and_continues() {
        let mut bytes = encode(
            Level::Info,
            Some(1),
            TS,
            "m",
            &[Field::string("s", "abcdef"), Field::int("n", 5)],
        );
        // Claim the string is far longer than what follows.
        let len_pos = 23 + 1 + 1 + 1 + 1 + 1;
        bytes[len_pos..len_pos + 2].copy_from_slice(&500u16.to_be_bytes());

        let record = decode(&bytes).unwrap();
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.fields[0].value, DecodedValue::Truncated);
        assert_eq!(record.encoded_len, bytes.len());
    }

    #[test]
    fn test_unknown_field_type_stops_fields() {
        let mut bytes = encode(
            Level::Info,
            Some(1),
            TS,
            "m",
            &[Field::int("a", 1), Field::int("b", 2)],
        );
        let type_pos = 23 + 1 + 1 + 1 + 1;
        bytes[type_pos] = 42;
        let record = decode(&bytes).unwrap();
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.fields[0].value, DecodedValue::Unknown);
        assert_eq!(record.fields[0].type_tag, 42);
    }

    #[test]
    fn test_v2_round_trip_both_layouts() {
        let mut out = Vec::new();
        encode_basic_into(&mut out, ProtocolVersion::V2, Level::Error, TS, "");
        let record = decode(&out).unwrap();
        assert_eq!(record.layout, Layout::Basic);
        assert_eq!(record.version, VERSION_2);
        assert_eq!(record.timestamp, TS);
        assert!(record.message.is_empty());

        out.clear();
        // Timestamp low bytes that would fool the untagged heuristic.
        let ts = (TS & !0xFFFF) | 3;
        encode_structured_into(&mut out, ProtocolVersion::V2, Level::Debug, 4, ts, "abc", &[]);
        let record = decode(&out).unwrap();
        assert_eq!(record.layout, Layout::Structured);
        assert_eq!(record.sequence, Some(4));
        assert_eq!(record.timestamp, ts);
        assert_eq!(record.message, b"abc");
    }

    #[test]
    fn test_decode_as_forces_layout() {
        let ts = TS | 5;
        let bytes = encode(Level::Info, Some(3), ts, "order placed", &[Field::uint("id", 7)]);
        assert_eq!(decode(&bytes).unwrap().layout, Layout::Basic);

        let record = decode_as(&bytes, Layout::Structured).unwrap();
        assert_eq!(record.sequence, Some(3));
        assert_eq!(record.timestamp, ts);
        assert_eq!(record.message, b"order placed");
        assert_eq!(record.encoded_len, bytes.len());

        let basic = encode(Level::Info, None, TS, "hi", &[]);
        assert_eq!(
            decode_as(&basic, Layout::Structured),
            Err(Error::Truncated { needed: 23, available: 18 })
        );
        assert_eq!(decode_as(&basic, Layout::Basic).unwrap().message, b"hi");
    }

    #[test]
    fn test_v2_bad_discriminant() {
        let mut out = Vec::new();
        encode_basic_into(&mut out, ProtocolVersion::V2, Level::Info, TS, "x");
        out[PREFIX_SIZE] = 9;
        assert_eq!(decode(&out), Err(Error::AmbiguousHeader));
    }

    #[test]
    fn test_level_and_type_bytes() {
        for level in Level::ALL {
            assert_eq!(Level::from_u8(level as u8), Some(level));
        }
        assert_eq!(Level::from_u8(5), None);
        assert_eq!(FieldType::from_u8(6), Some(FieldType::Bytes));
        assert_eq!(FieldType::from_u8(7), None);
        assert_eq!(format!("{:<5}|", Level::Info), "INFO |");
    }
}
