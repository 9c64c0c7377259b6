//! Dynamic column values decoded from text-format wire data.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A decoded column value.
///
/// The adapter decodes whole rows dynamically because statement shapes are
/// only known at runtime; callers that want static types convert from here.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Uuid(Uuid),
}

impl Value {
    /// True when the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as text, when it carries one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, when it carries one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Numeric(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "\\x{}", hex_encode(b)),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::TimestampTz(ts) => write!(f, "{}", ts),
            Value::Uuid(u) => write!(f, "{}", u),
        }
    }
}

pub fn decode_bool(text: &str) -> Result<Value> {
    match text {
        "t" => Ok(Value::Bool(true)),
        "f" => Ok(Value::Bool(false)),
        _ => Err(decode_error("bool", text)),
    }
}

pub fn decode_int(text: &str) -> Result<Value> {
    text.parse()
        .map(Value::Int)
        .map_err(|_| decode_error("integer", text))
}

pub fn decode_float(text: &str) -> Result<Value> {
    // PostgreSQL renders the IEEE specials with these exact spellings.
    match text {
        "NaN" => Ok(Value::Float(f64::NAN)),
        "Infinity" => Ok(Value::Float(f64::INFINITY)),
        "-Infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
        _ => text
            .parse()
            .map(Value::Float)
            .map_err(|_| decode_error("float", text)),
    }
}

pub fn decode_numeric(text: &str) -> Result<Value> {
    text.parse::<Decimal>()
        .map(Value::Numeric)
        .map_err(|_| decode_error("numeric", text))
}

pub fn decode_text(text: &str) -> Result<Value> {
    Ok(Value::Text(text.to_string()))
}

/// Decode bytea in hex output format (`\x6465616462656566`).
pub fn decode_bytea(text: &str) -> Result<Value> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| decode_error("bytea", text))?;
    if hex.len() % 2 != 0 {
        return Err(decode_error("bytea", text));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let hi = hex_digit(chunk[0]).ok_or_else(|| decode_error("bytea", text))?;
        let lo = hex_digit(chunk[1]).ok_or_else(|| decode_error("bytea", text))?;
        bytes.push(hi << 4 | lo);
    }
    Ok(Value::Bytes(bytes))
}

pub fn decode_date(text: &str) -> Result<Value> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(Value::Date)
        .map_err(|_| decode_error("date", text))
}

pub fn decode_time(text: &str) -> Result<Value> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .map(Value::Time)
        .map_err(|_| decode_error("time", text))
}

pub fn decode_timestamp(text: &str) -> Result<Value> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(Value::Timestamp)
        .map_err(|_| decode_error("timestamp", text))
}

/// Decode timestamptz. PostgreSQL emits offsets like `+00` or `+05:30`.
pub fn decode_timestamptz(text: &str) -> Result<Value> {
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
        .map(Value::TimestampTz)
        .map_err(|_| decode_error("timestamptz", text))
}

pub fn decode_uuid(text: &str) -> Result<Value> {
    text.parse::<Uuid>()
        .map(Value::Uuid)
        .map_err(|_| decode_error("uuid", text))
}

fn decode_error(type_name: &str, text: &str) -> Error {
    Error::Protocol(format!("cannot decode {:?} as {}", text, type_name))
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
