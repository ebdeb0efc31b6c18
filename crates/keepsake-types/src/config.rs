//! Configuration for the memory subsystem, loaded from `config.toml`.

use crate::memory::ContextLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory holding the database. Default: `~/.keepsake`.
    pub data_dir: PathBuf,
    /// Explicit database file. Default: `<data_dir>/memory.db`.
    pub database_path: Option<PathBuf>,
    /// Triggers at or below this clarity are not surfaced.
    pub trigger_floor: u8,
    /// Size of the `recent` list returned by a context query.
    pub recent_limit: usize,
    /// How many recent facts make it into the rendered bundle.
    pub recent_in_context: usize,
    /// Seconds between background decay passes.
    pub decay_interval_secs: u64,
    /// Upper bound on a single decay pass.
    pub decay_timeout_secs: u64,
    /// Per-turn budget for store round trips before memory is skipped.
    pub store_timeout_ms: u64,
    /// Stamp `last_accessed` on facts surfaced into a bundle.
    pub note_access: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: keepsake_home(),
            database_path: None,
            trigger_floor: 20,
            recent_limit: 10,
            recent_in_context: 5,
            decay_interval_secs: 86_400,
            decay_timeout_secs: 300,
            store_timeout_ms: 1_500,
            note_access: false,
        }
    }
}

impl MemoryConfig {
    /// Resolved path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("memory.db"))
    }

    pub fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            trigger_floor: self.trigger_floor,
            recent_limit: self.recent_limit,
        }
    }
}

/// Default keepsake home directory.
pub fn keepsake_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".keepsake")
}
