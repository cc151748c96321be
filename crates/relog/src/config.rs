//! Pipeline configuration: worker count, field-role key lists, defaults,
//! and pool ceilings. Loadable from a TOML file, with sane defaults for
//! every field.

use std::fs::File;
use std::io::Read;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::level::Level;
use crate::pool::{MAX_POOLED_BUFFER, MAX_POOLED_RECORDS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of parse/encode workers. Defaults to available parallelism.
    pub workers: usize,
    /// Level assigned to a record before (or instead of) a successful
    /// level-field parse.
    pub default_level: Level,
    /// Largest buffer capacity the buffer pool retains, in bytes.
    pub max_pooled_buffer: usize,
    /// Largest record count the chunk pool retains.
    pub max_pooled_records: usize,
    /// Key lists that map JSON keys to record roles.
    pub roles: RoleConfig,
}

/// Ordered key lists, one per record role.
///
/// Position in a list is the key's priority: when one input object carries
/// several candidate keys for the same role, the key at the lowest index
/// wins, and among keys at the same index the first one seen wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub time: Vec<String>,
    pub level: Vec<String>,
    pub message: Vec<String>,
    pub caller: Vec<String>,
    pub error: Vec<String>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            time: vec!["time".into(), "ts".into(), "timestamp".into()],
            level: vec!["level".into()],
            message: vec!["msg".into()],
            caller: vec!["caller".into()],
            error: vec!["error".into(), "err".into()],
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_level: Level::INFO,
            max_pooled_buffer: MAX_POOLED_BUFFER,
            max_pooled_records: MAX_POOLED_RECORDS,
            roles: RoleConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: PipelineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate that configuration values are sane.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.max_pooled_buffer == 0 {
            return Err("max_pooled_buffer must be > 0".to_string());
        }
        if self.max_pooled_records == 0 {
            return Err("max_pooled_records must be > 0".to_string());
        }
        if self.roles.time.is_empty() {
            return Err("roles.time must list at least one key".to_string());
        }
        if self.roles.level.is_empty() {
            return Err("roles.level must list at least one key".to_string());
        }
        if self.roles.message.is_empty() {
            return Err("roles.message must list at least one key".to_string());
        }
        Ok(())
    }
}
