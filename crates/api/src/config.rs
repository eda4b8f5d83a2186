//! Runtime configuration, read from `RULESTORE_*` environment variables.

use std::time::Duration;

use rulestore_schema::Limits;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// In-memory store shard count.
    pub shards: usize,
    /// Attempts the allocator makes before giving up on a generated name.
    pub name_retries: usize,
    /// Per-operation deadline for async callers.
    pub op_timeout_ms: u64,
    pub max_object_bytes: usize,
    pub max_object_nodes: usize,
    pub max_patch_ops: usize,
    pub base_interval_secs: u64,
    /// Require folder-scoped objects to reference an existing Folder.
    pub check_folders: bool,
    pub event_capacity: usize,
    pub db_path: Option<String>,
    pub history_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shards: 16,
            name_retries: 8,
            op_timeout_ms: 5_000,
            max_object_bytes: 1_000_000,
            max_object_nodes: 100_000,
            max_patch_ops: 1_000,
            base_interval_secs: 10,
            check_folders: false,
            event_capacity: 1024,
            db_path: None,
            history_depth: 10,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl Config {
    /// Defaults overlaid with any parseable `RULESTORE_*` variables. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            shards: env_parse("RULESTORE_SHARDS").unwrap_or(d.shards).max(1),
            name_retries: env_parse("RULESTORE_NAME_RETRIES").unwrap_or(d.name_retries).max(1),
            op_timeout_ms: env_parse("RULESTORE_OP_TIMEOUT_MS").unwrap_or(d.op_timeout_ms),
            max_object_bytes: env_parse("RULESTORE_MAX_OBJECT_BYTES").unwrap_or(d.max_object_bytes),
            max_object_nodes: env_parse("RULESTORE_MAX_OBJECT_NODES").unwrap_or(d.max_object_nodes),
            max_patch_ops: env_parse("RULESTORE_MAX_PATCH_OPS").unwrap_or(d.max_patch_ops),
            base_interval_secs: env_parse("RULESTORE_BASE_INTERVAL_SECS").unwrap_or(d.base_interval_secs).max(1),
            check_folders: env_flag("RULESTORE_CHECK_FOLDERS").unwrap_or(d.check_folders),
            event_capacity: env_parse("RULESTORE_EVENT_CAPACITY").unwrap_or(d.event_capacity).max(1),
            db_path: std::env::var("RULESTORE_DB_PATH").ok().filter(|s| !s.is_empty()),
            history_depth: env_parse("RULESTORE_HISTORY_DEPTH").unwrap_or(d.history_depth).max(1),
        }
    }

    pub fn op_timeout(&self) -> Duration { Duration::from_millis(self.op_timeout_ms) }

    pub fn base_interval(&self) -> Duration { Duration::from_secs(self.base_interval_secs) }

    pub fn limits(&self) -> Limits { Limits { max_bytes: self.max_object_bytes, max_nodes: self.max_object_nodes } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.shards, 16);
        assert_eq!(c.op_timeout(), Duration::from_secs(5));
        assert_eq!(c.base_interval(), Duration::from_secs(10));
        assert_eq!(c.limits(), Limits::default());
        assert!(!c.check_folders);
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        std::env::set_var("RULESTORE_NAME_RETRIES", "3");
        std::env::set_var("RULESTORE_MAX_PATCH_OPS", "not-a-number");
        std::env::set_var("RULESTORE_CHECK_FOLDERS", "TRUE");
        let c = Config::from_env();
        std::env::remove_var("RULESTORE_NAME_RETRIES");
        std::env::remove_var("RULESTORE_MAX_PATCH_OPS");
        std::env::remove_var("RULESTORE_CHECK_FOLDERS");
        assert_eq!(c.name_retries, 3);
        assert_eq!(c.max_patch_ops, 1_000);
        assert!(c.check_folders);
    }
}
