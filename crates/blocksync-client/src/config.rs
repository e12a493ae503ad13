//! Session configuration, loadable from TOML.
//!
//! ```toml
//! notice_capacity = 256
//! refresh_on_resolve = true
//! insert_fetch_delay_ms = 100
//! max_failed_digests = 64
//! blocks_collection = { kind = "blocks" }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use blocksync_types::Collection;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_INSERT_FETCH_DELAY, DEFAULT_MAX_FAILED_DIGESTS, DEFAULT_NOTICE_CAPACITY,
    DEFAULT_REFRESH_LIMIT,
};

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for a [`SyncSession`](crate::SyncSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub notice_capacity: usize,
    /// Re-fetch a stream row after a write to it resolves, so server-side
    /// effects become visible.
    pub refresh_on_resolve: bool,
    pub insert_fetch_delay_ms: u64,
    pub max_failed_digests: usize,
    /// Page size for a full stream refresh.
    pub refresh_limit: usize,
    /// Collection holding document blocks.
    pub blocks_collection: Collection,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
            refresh_on_resolve: true,
            insert_fetch_delay_ms: DEFAULT_INSERT_FETCH_DELAY.as_millis() as u64,
            max_failed_digests: DEFAULT_MAX_FAILED_DIGESTS,
            refresh_limit: DEFAULT_REFRESH_LIMIT,
            blocks_collection: Collection::Blocks,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn insert_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.insert_fetch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_default() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.insert_fetch_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_override() {
        let config = SyncConfig::from_toml_str(
            r#"
            refresh_on_resolve = false
            insert_fetch_delay_ms = 0
            blocks_collection = { kind = "custom", name = "form_blocks" }
            "#,
        )
        .unwrap();
        assert!(!config.refresh_on_resolve);
        assert_eq!(config.insert_fetch_delay(), Duration::ZERO);
        assert_eq!(config.blocks_collection, Collection::custom("form_blocks"));
        assert_eq!(config.notice_capacity, 256);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = SyncConfig::from_toml_str("notice_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_failed_digests = 3").unwrap();
        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.max_failed_digests, 3);

        let missing = SyncConfig::load("/nonexistent/blocksync.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
