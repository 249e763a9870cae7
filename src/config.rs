// src/config.rs

//! Store engine configuration
//!
//! Everything that depends on the host installation (the build group, where
//! staging happens, network timeouts) lives here rather than in constants.
//! Configuration is optional: [`StoreConfig::default`] is usable as-is, and a
//! JSON file can override any subset of the fields.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default size of the dependency scanner's read buffer (16 MiB)
pub const DEFAULT_SCAN_BUFFER_SIZE: usize = 16 << 20;

/// Smallest scanner buffer accepted by [`StoreConfig::validate`]
pub const MIN_SCAN_BUFFER_SIZE: usize = 64;

/// Nix normalizes store timestamps to one second past the Unix epoch
pub const DEFAULT_MTIME_EPOCH: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the staging directory created inside the destination store
    pub staging_dir: String,

    /// Group ID given to extracted files; `None` leaves the group unchanged
    pub build_group: Option<u32>,

    /// Modification time (Unix seconds) applied to every extracted entry
    pub mtime_epoch: i64,

    /// Read buffer size for the dependency scanner
    pub scan_buffer_size: usize,

    /// Timeout for remote store requests
    pub http_timeout_secs: u64,

    /// Check NarHash/NarSize from sidecar metadata while extracting
    pub verify_nar_hash: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            staging_dir: ".staging".to_string(),
            build_group: None,
            mtime_epoch: DEFAULT_MTIME_EPOCH,
            scan_buffer_size: DEFAULT_SCAN_BUFFER_SIZE,
            http_timeout_secs: 30,
            verify_nar_hash: true,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: StoreConfig = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine can't work with
    pub fn validate(&self) -> Result<()> {
        let staging = self.staging_dir.as_str();
        if staging.is_empty() || staging == "." || staging == ".." || staging.contains('/') {
            return Err(Error::Config(format!(
                "staging_dir must be a single directory name, got {:?}",
                staging
            )));
        }
        if self.scan_buffer_size < MIN_SCAN_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "scan_buffer_size must be at least {} bytes, got {}",
                MIN_SCAN_BUFFER_SIZE, self.scan_buffer_size
            )));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_dir, ".staging");
        assert_eq!(config.mtime_epoch, 1);
        assert_eq!(config.build_group, None);
    }

    #[test]
    fn test_load_partial_file() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), r#"{"build_group": 30000, "mtime_epoch": 0}"#).unwrap();

        let config = StoreConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.build_group, Some(30000));
        assert_eq!(config.mtime_epoch, 0);
        // Unspecified fields keep their defaults
        assert_eq!(config.scan_buffer_size, DEFAULT_SCAN_BUFFER_SIZE);
        assert!(config.verify_nar_hash);
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), r#"{"staging_dir": "../escape"}"#).unwrap();
        assert!(matches!(
            StoreConfig::load(temp_file.path()),
            Err(Error::Config(_))
        ));

        fs::write(temp_file.path(), r#"{"scan_buffer_size": 8}"#).unwrap();
        assert!(matches!(
            StoreConfig::load(temp_file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = StoreConfig::load(Path::new("/nonexistent/depot.json"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
