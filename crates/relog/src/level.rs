//! Log level scale and the free-text level parser.
//!
//! Levels live on a signed integer scale with four named anchors
//! (DEBUG = -4, INFO = 0, WARN = 4, ERROR = 8), so values in between
//! express severity offsets the way structured loggers emit them
//! (`"WARN2"` means warn-and-then-some). The parser accepts full names,
//! three-letter codes, and single letters in the common case spellings,
//! plus an optional trailing numeric offset with no separator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An ordered log severity on a signed integer scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Level(pub i32);

impl Level {
    pub const DEBUG: Level = Level(-4);
    pub const INFO: Level = Level(0);
    pub const WARN: Level = Level(4);
    pub const ERROR: Level = Level(8);

    /// Shift this level by a signed offset.
    pub fn offset(self, delta: i32) -> Level {
        Level(self.0.saturating_add(delta))
    }
}

impl fmt::Display for Level {
    /// Renders the nearest named anchor at or below the value, with the
    /// remainder as a signed offset: `INFO`, `WARN+2`, `DEBUG-1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, base) = if self.0 >= Level::ERROR.0 {
            ("ERROR", Level::ERROR.0)
        } else if self.0 >= Level::WARN.0 {
            ("WARN", Level::WARN.0)
        } else if self.0 >= Level::INFO.0 {
            ("INFO", Level::INFO.0)
        } else {
            ("DEBUG", Level::DEBUG.0)
        };
        let delta = self.0 - base;
        if delta == 0 {
            f.write_str(name)
        } else {
            write!(f, "{}{:+}", name, delta)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    #[error("does not recognize {0:?} as a log level")]
    Unrecognized(String),
    #[error("invalid level offset in {0:?}")]
    Offset(String),
}

/// Signature of a pluggable level parser.
///
/// The record parser calls this for every level-role field; callers must
/// treat an `Err` as "value is unset" and not use the level.
pub type LevelFn = dyn Fn(&str) -> Result<Level, LevelError> + Send + Sync;

/// Parse a free-text level token.
///
/// If the token ends in a digit, it is a symbolic prefix followed by a
/// signed numeric offset with no separator (`"WARN2"`, `"Error-1"`).
/// Otherwise the whole token is looked up in a case-sensitive table.
pub fn parse_level(token: &str) -> Result<Level, LevelError> {
    let bytes = token.as_bytes();
    if bytes.last().is_some_and(|b| b.is_ascii_digit()) {
        return parse_with_offset(token);
    }
    lookup(token).ok_or_else(|| LevelError::Unrecognized(token.to_owned()))
}

fn parse_with_offset(token: &str) -> Result<Level, LevelError> {
    let bytes = token.as_bytes();
    let mut split = bytes.len();
    while split > 0 && bytes[split - 1].is_ascii_digit() {
        split -= 1;
    }
    if split > 0 && bytes[split - 1] == b'-' {
        split -= 1;
    }

    let base = lookup(&token[..split])
        .ok_or_else(|| LevelError::Unrecognized(token.to_owned()))?;
    let delta: i32 = token[split..]
        .parse()
        .map_err(|_| LevelError::Offset(token.to_owned()))?;
    Ok(base.offset(delta))
}

/// Case-sensitive token table: full names, three-letter codes, and single
/// letters in the spellings structured loggers actually emit.
fn lookup(token: &str) -> Option<Level> {
    let level = match token {
        "debug" | "Debug" | "DEBUG" | "dbg" | "Dbg" | "DBG" | "d" | "D" => Level::DEBUG,
        "info" | "Info" | "INFO" | "inf" | "Inf" | "INF" | "i" | "I" => Level::INFO,
        "warn" | "Warn" | "WARN" | "warning" | "Warning" | "WARNING" | "wrn" | "Wrn" | "WRN"
        | "w" | "W" => Level::WARN,
        "error" | "Error" | "ERROR" | "err" | "Err" | "ERR" | "e" | "E" => Level::ERROR,
        _ => return None,
    };
    Some(level)
}
