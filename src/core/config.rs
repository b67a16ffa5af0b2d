//! Engine configuration loaded from `schemup.toml`.

use crate::core::error::{ConfigError, SchemupError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "schemup.toml";

/// Tunables for a scheduler run. Every field has a default so a missing
/// config file means default behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Bounded wait when acquiring the schema lock, in milliseconds.
    /// Exceeding it surfaces a lock-contention error rather than blocking.
    pub lock_wait_ms: u64,
    /// Age in seconds after which a lock row left by a crashed run may be
    /// taken over.
    pub lock_stale_secs: i64,
    /// Pool identity recorded with every ledger row.
    pub pool_id: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 2_000,
            lock_stale_secs: 3_600,
            pool_id: 0,
        }
    }
}

impl EngineConfig {
    /// Parse a config file. An unreadable or malformed file is a
    /// configuration error, not a silent fallback.
    pub fn load(path: &Path) -> Result<Self, SchemupError> {
        let content = fs::read_to_string(path).map_err(SchemupError::Io)?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())).into())
    }

    /// Load `schemup.toml` from the given directory if present, otherwise
    /// defaults.
    pub fn load_or_default(dir: &Path) -> Result<Self, SchemupError> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}
