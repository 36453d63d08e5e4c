use std::fmt::{self, Display};

use num_enum::TryFromPrimitive;
use ordered_float::OrderedFloat;

use crate::utils::buffers;

/// Tag byte prefixed to every serialised value.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
pub enum ValueTag {
    Int = 0,
    Float,
    String,
    Dict,
    Set,
    List,
    Bytes,
    True,
    False,
    None,
}

/// A value that can cross the wire to the execution engine: constants-pool
/// entries, module headers and runspec archives are all built from these.
///
/// `Dict` and `List` preserve insertion order; `Set` order is unspecified and
/// two sets compare equal when they contain the same elements.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Float(OrderedFloat<f64>),
    Str(String),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    List(Vec<Value>),
    Bytes(Vec<u8>),
    Bool(bool),
    None,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x))
            }
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            _ => false,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(OrderedFloat(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl Display for Value {
    /// Source-form rendering, used by the AST pretty printer for literals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v.into_inner())
                } else {
                    write!(f, "{}", v.into_inner())
                }
            }
            Value::Str(v) => write!(f, "\"{}\"", escape_string(v)),
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Bytes(bytes) => write!(f, "{bytes:?}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::None => write!(f, "none"),
        }
    }
}

pub fn escape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\x0b' => out.push_str("\\v"),
            _ => out.push(c),
        }
    }
    out
}

/// Raised when a constants-pool entry cannot be rendered as a wire value
/// (an unresolved function entry label).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    Unsupported,
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Unsupported => write!(f, "value cannot be serialised"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    InvalidTag(u8),
    InvalidUtf8,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => {
                write!(f, "unexpected end of serialised data")
            }
            DecodeError::InvalidTag(tag) => {
                write!(f, "invalid value tag: {tag:#04x}")
            }
            DecodeError::InvalidUtf8 => {
                write!(f, "string payload is not valid UTF-8")
            }
        }
    }
}

pub fn serialise(value: &Value) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(16);
    append_value(&mut buffer, value);
    buffer
}

pub fn append_value(buffer: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int(v) => {
            buffers::append_u8(buffer, ValueTag::Int as u8);
            buffers::append_i32(buffer, *v);
        }
        Value::Float(v) => {
            buffers::append_u8(buffer, ValueTag::Float as u8);
            buffers::append_f64(buffer, v.into_inner());
        }
        Value::Str(v) => {
            buffers::append_u8(buffer, ValueTag::String as u8);
            buffers::append_u32(buffer, v.len() as u32);
            buffers::append_buffer(buffer, v.as_bytes());
        }
        Value::Dict(entries) => {
            buffers::append_u8(buffer, ValueTag::Dict as u8);
            buffers::append_u32(buffer, entries.len() as u32);
            for (key, value) in entries {
                append_value(buffer, key);
                append_value(buffer, value);
            }
        }
        Value::Set(items) => {
            buffers::append_u8(buffer, ValueTag::Set as u8);
            buffers::append_u32(buffer, items.len() as u32);
            for item in items {
                append_value(buffer, item);
            }
        }
        Value::List(items) => {
            buffers::append_u8(buffer, ValueTag::List as u8);
            buffers::append_u32(buffer, items.len() as u32);
            for item in items {
                append_value(buffer, item);
            }
        }
        Value::Bytes(bytes) => {
            buffers::append_u8(buffer, ValueTag::Bytes as u8);
            buffers::append_u32(buffer, bytes.len() as u32);
            buffers::append_buffer(buffer, bytes);
        }
        Value::Bool(true) => buffers::append_u8(buffer, ValueTag::True as u8),
        Value::Bool(false) => buffers::append_u8(buffer, ValueTag::False as u8),
        Value::None => buffers::append_u8(buffer, ValueTag::None as u8),
    }
}

pub fn deserialise(bytes: &[u8]) -> Result<(Value, usize), DecodeError> {
    deserialise_at(bytes, 0)
}

/// Decodes one value starting at `pos`, returning it together with the offset
/// one past its encoding. The module reader uses this to pull the header and
/// body records out of the same buffer.
pub fn deserialise_at(
    bytes: &[u8],
    pos: usize,
) -> Result<(Value, usize), DecodeError> {
    let mut index = pos;
    need(bytes, index, 1)?;
    let raw_tag = buffers::read_u8(bytes, &mut index);
    let tag = ValueTag::try_from_primitive(raw_tag)
        .map_err(|_| DecodeError::InvalidTag(raw_tag))?;
    let value = match tag {
        ValueTag::Int => {
            need(bytes, index, 4)?;
            Value::Int(buffers::read_i32(bytes, &mut index))
        }
        ValueTag::Float => {
            need(bytes, index, 8)?;
            Value::Float(OrderedFloat(buffers::read_f64(bytes, &mut index)))
        }
        ValueTag::String => {
            let len = read_len(bytes, &mut index)?;
            let raw = buffers::read_slice(bytes, &mut index, len);
            Value::Str(
                String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?,
            )
        }
        ValueTag::Dict => {
            let len = read_len_unsized(bytes, &mut index)?;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let (key, next) = deserialise_at(bytes, index)?;
                let (value, next) = deserialise_at(bytes, next)?;
                index = next;
                entries.push((key, value));
            }
            Value::Dict(entries)
        }
        ValueTag::Set => {
            let len = read_len_unsized(bytes, &mut index)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                let (item, next) = deserialise_at(bytes, index)?;
                index = next;
                items.push(item);
            }
            Value::Set(items)
        }
        ValueTag::List => {
            let len = read_len_unsized(bytes, &mut index)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                let (item, next) = deserialise_at(bytes, index)?;
                index = next;
                items.push(item);
            }
            Value::List(items)
        }
        ValueTag::Bytes => {
            let len = read_len(bytes, &mut index)?;
            Value::Bytes(buffers::read_slice(bytes, &mut index, len))
        }
        ValueTag::True => Value::Bool(true),
        ValueTag::False => Value::Bool(false),
        ValueTag::None => Value::None,
    };
    Ok((value, index))
}

fn need(bytes: &[u8], pos: usize, count: usize) -> Result<(), DecodeError> {
    if bytes.len() < pos + count {
        Err(DecodeError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Reads a u32 count that is followed by `count` raw payload bytes.
fn read_len(bytes: &[u8], index: &mut usize) -> Result<usize, DecodeError> {
    let len = read_len_unsized(bytes, index)?;
    need(bytes, *index, len)?;
    Ok(len)
}

/// Reads a u32 element count whose payload size is not yet known.
fn read_len_unsized(
    bytes: &[u8],
    index: &mut usize,
) -> Result<usize, DecodeError> {
    need(bytes, *index, 4)?;
    Ok(buffers::read_u32(bytes, index) as usize)
}
