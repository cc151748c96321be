//! Parsed record model: records, attributes, typed values, parse counters.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::level::Level;

/// One parsed log entry.
///
/// `attrs` preserves the input object's field order, minus the keys that
/// were consumed into the dedicated time/level/message/caller slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Timestamp in UTC at nanosecond resolution. `None` means the field
    /// was absent or failed to parse.
    pub time: Option<DateTime<Utc>>,
    pub level: Level,
    pub message: Arc<str>,
    pub caller: Option<Caller>,
    pub attrs: Vec<Attr>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            time: None,
            level: Level::default(),
            message: Arc::from(""),
            caller: None,
            attrs: Vec::new(),
        }
    }
}

/// Call-site information split out of a `caller` field.
///
/// A `file:line` value fills `file`/`line`; a value without a parsable
/// `:line` suffix is kept whole in `function`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub function: Option<Arc<str>>,
    pub file: Option<Arc<str>>,
    pub line: Option<u32>,
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line, &self.function) {
            (Some(file), Some(line), _) => write!(f, "{}:{}", file, line),
            (Some(file), None, _) => f.write_str(file),
            (None, _, Some(function)) => f.write_str(function),
            (None, _, None) => Ok(()),
        }
    }
}

/// A key plus a typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: Arc<str>,
    pub value: Value,
}

impl Attr {
    pub fn new(key: Arc<str>, value: Value) -> Self {
        Self { key, value }
    }
}

/// A typed attribute value.
///
/// `Error` is a string that arrived under an error-role key; it keeps the
/// "this is an error message" distinction visible to downstream consumers
/// instead of collapsing into a plain string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Uint(u64),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Error(Arc<str>),
    Array(Vec<Value>),
    Group(Vec<Attr>),
}

/// Per-parser counters. Single-owner: each worker owns its parser, so
/// these are plain integers, merged once at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Lines seen, valid or not.
    pub lines_total: u64,
    /// Lines that failed the structural parse (not a JSON object).
    pub lines_invalid: u64,
    /// Recognized fields that carried the wrong JSON type or an
    /// unparsable value.
    pub field_errors: u64,
}

impl Stat {
    pub fn merge(&mut self, other: &Stat) {
        self.lines_total += other.lines_total;
        self.lines_invalid += other.lines_invalid;
        self.field_errors += other.field_errors;
    }
}

// Serialization is hand-written so output field order matches record order
// (derived map serialization would not preserve attribute order or the
// time/level/msg header shape).

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(time) = &self.time {
            map.serialize_entry("time", &time.to_rfc3339_opts(SecondsFormat::Nanos, true))?;
        }
        map.serialize_entry("level", &self.level.to_string())?;
        map.serialize_entry("msg", self.message.as_ref())?;
        if let Some(caller) = &self.caller {
            map.serialize_entry("caller", &caller.to_string())?;
        }
        for attr in &self.attrs {
            map.serialize_entry(attr.key.as_ref(), &attr.value)?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Uint(u) => serializer.serialize_u64(*u),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) | Value::Error(s) => serializer.serialize_str(s),
            Value::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Value::Group(attrs) => {
                let mut map = serializer.serialize_map(Some(attrs.len()))?;
                for attr in attrs {
                    map.serialize_entry(attr.key.as_ref(), &attr.value)?;
                }
                map.end()
            }
        }
    }
}
