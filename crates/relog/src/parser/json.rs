//! JSON-to-record parser with a configurable field-role table.
//!
//! One record per newline-terminated JSON object. Recognized keys are
//! routed into the dedicated time/level/message/caller slots by priority;
//! everything else becomes an ordered attribute. Malformed lines and
//! mistyped fields are counted, never fatal: the stream always keeps going.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::config::{PipelineConfig, RoleConfig};
use crate::level::{Level, LevelFn};
use crate::parser::intern::StringArena;
use crate::parser::model::{Attr, Caller, Record, Stat, Value};
use crate::parser::RecordParser;
use crate::pool::Chunk;

/// Semantic meaning assigned to a recognized JSON key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Time,
    Level,
    Message,
    Caller,
    Error,
}

/// Key → (role, priority) lookup built from the configured key lists.
/// A key claimed by two role lists keeps its first (role-order) claim.
#[derive(Debug)]
struct RoleTable {
    map: HashMap<String, (Role, usize)>,
}

impl RoleTable {
    fn new(config: &RoleConfig) -> Self {
        let lists = [
            (Role::Time, &config.time),
            (Role::Level, &config.level),
            (Role::Message, &config.message),
            (Role::Caller, &config.caller),
            (Role::Error, &config.error),
        ];

        let mut map = HashMap::new();
        for (role, keys) in lists {
            for (priority, key) in keys.iter().enumerate() {
                map.entry(key.clone()).or_insert((role, priority));
            }
        }
        Self { map }
    }

    fn role_of(&self, key: &str) -> Option<(Role, usize)> {
        self.map.get(key).copied()
    }
}

/// Remember `value` for a deferred slot only if it beats the priority
/// already held. Strictly-lower index wins; ties keep the first seen.
fn defer<'v>(slot: &mut Option<(usize, &'v JsonValue)>, priority: usize, value: &'v JsonValue) {
    let better = match slot {
        Some((best, _)) => priority < *best,
        None => true,
    };
    if better {
        *slot = Some((priority, value));
    }
}

pub struct JsonRecordParser {
    roles: RoleTable,
    level_fn: Arc<LevelFn>,
    default_level: Level,
    arena: StringArena,
    stat: Stat,
}

impl JsonRecordParser {
    pub fn new(roles: &RoleConfig, default_level: Level, level_fn: Arc<LevelFn>) -> Self {
        Self {
            roles: RoleTable::new(roles),
            level_fn,
            default_level,
            arena: StringArena::new(),
            stat: Stat::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, level_fn: Arc<LevelFn>) -> Self {
        Self::new(&config.roles, config.default_level, level_fn)
    }

    /// Parse every line in `block`, appending one record per structurally
    /// valid line to `out`.
    pub fn parse_block(&mut self, block: &[u8], out: &mut Chunk) {
        for line in block.split(|&b| b == b'\n') {
            // The artifact segment after a trailing newline, and genuinely
            // blank lines, are not log lines.
            if line.is_empty() {
                continue;
            }
            self.stat.lines_total += 1;
            match self.parse_line(line) {
                Some(record) => out.push(record),
                None => self.stat.lines_invalid += 1,
            }
        }
    }

    /// Parse one line. `None` means the structural parse failed (not JSON,
    /// or not an object at the top level).
    fn parse_line(&mut self, line: &[u8]) -> Option<Record> {
        let value: JsonValue = serde_json::from_slice(line).ok()?;
        let JsonValue::Object(object) = value else {
            return None;
        };

        let mut record = Record {
            time: None,
            level: self.default_level,
            message: Arc::from(""),
            caller: None,
            attrs: Vec::with_capacity(object.len()),
        };

        // Best-priority-so-far slots. Resolution is deferred until the whole
        // object has been visited so a later key at a better priority can
        // still override one already seen.
        let mut time: Option<(usize, &JsonValue)> = None;
        let mut level: Option<(usize, &JsonValue)> = None;
        let mut message: Option<(usize, &JsonValue)> = None;
        let mut caller: Option<(usize, &JsonValue)> = None;

        for (key, value) in &object {
            match self.roles.role_of(key) {
                Some((Role::Time, priority)) => defer(&mut time, priority, value),
                Some((Role::Level, priority)) => defer(&mut level, priority, value),
                Some((Role::Message, priority)) => defer(&mut message, priority, value),
                Some((Role::Caller, priority)) => defer(&mut caller, priority, value),
                Some((Role::Error, _)) => {
                    // Error keys resolve immediately, in place: a bare string
                    // is wrapped so consumers still see "this is an error".
                    let resolved = match value {
                        JsonValue::String(s) => Value::Error(self.arena.intern(s)),
                        other => self.convert(other),
                    };
                    let key = self.arena.intern(key);
                    record.attrs.push(Attr::new(key, resolved));
                }
                None => {
                    let converted = self.convert(value);
                    let key = self.arena.intern(key);
                    record.attrs.push(Attr::new(key, converted));
                }
            }
        }

        if let Some((_, value)) = time {
            match value {
                JsonValue::String(s) => match DateTime::parse_from_rfc3339(s) {
                    Ok(parsed) => record.time = Some(parsed.with_timezone(&Utc)),
                    Err(_) => self.stat.field_errors += 1,
                },
                _ => self.stat.field_errors += 1,
            }
        }

        if let Some((_, value)) = level {
            match value {
                JsonValue::String(s) => match (self.level_fn)(s) {
                    Ok(parsed) => record.level = parsed,
                    Err(_) => self.stat.field_errors += 1,
                },
                _ => self.stat.field_errors += 1,
            }
        }

        if let Some((_, value)) = message {
            match value {
                JsonValue::String(s) => record.message = self.arena.intern(s),
                _ => self.stat.field_errors += 1,
            }
        }

        if let Some((_, value)) = caller {
            match value {
                JsonValue::String(s) => {
                    let parsed = self.parse_caller(s);
                    record.caller = Some(parsed);
                }
                _ => self.stat.field_errors += 1,
            }
        }

        Some(record)
    }

    /// Split a caller value on its last `:` into file and line number.
    /// No `:`, or an unparsable line number, keeps the raw text as a bare
    /// function name (the numeric failure still counts as a field error).
    fn parse_caller(&mut self, text: &str) -> Caller {
        if let Some((file, line)) = text.rsplit_once(':') {
            match line.parse::<u32>() {
                Ok(number) => {
                    return Caller {
                        function: None,
                        file: Some(self.arena.intern(file)),
                        line: Some(number),
                    };
                }
                Err(_) => self.stat.field_errors += 1,
            }
        }
        Caller {
            function: Some(self.arena.intern(text)),
            file: None,
            line: None,
        }
    }

    /// Recursively convert a JSON value into an attribute value.
    fn convert(&mut self, value: &JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                // Unsigned first, then signed, then float; anything the
                // numeric types cannot hold falls back to the raw text.
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Str(self.arena.intern(&n.to_string()))
                }
            }
            JsonValue::String(s) => Value::Str(self.arena.intern(s)),
            JsonValue::Array(items) => {
                Value::Array(items.iter().map(|item| self.convert(item)).collect())
            }
            JsonValue::Object(object) => Value::Group(
                object
                    .iter()
                    .map(|(key, value)| {
                        let converted = self.convert(value);
                        Attr::new(self.arena.intern(key), converted)
                    })
                    .collect(),
            ),
        }
    }
}

impl RecordParser for JsonRecordParser {
    fn parse(&mut self, block: &[u8], out: &mut Chunk) {
        self.parse_block(block, out);
    }

    fn stat(&self) -> Stat {
        self.stat
    }
}
