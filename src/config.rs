//! Joiner configuration
//!
//! Defaults, then an optional JSON file, then environment overrides. The
//! front end applies its command line flags on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{JoinError, Result};
use crate::joiner::{DEFAULT_CHUNK_SIZE, DEFAULT_FORMAT};
use crate::resolver::EncoderLocator;
use crate::scanner::ScanFilter;

/// Overrides the chunk size
pub const CHUNK_SIZE_VAR: &str = "TOWEL_CHUNK_SIZE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinerConfig {
    /// Files joined per intermediate chunk
    pub chunk_size: usize,
    /// Pre-filled format field
    pub default_format: String,
    pub filter: ScanFilter,
    /// Explicit encoder; wins over every search location
    pub ffmpeg_path: Option<PathBuf>,
    /// Searched after the well-known install locations
    pub extra_search_dirs: Vec<PathBuf>,
    pub search_system_path: bool,
}

impl Default for JoinerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_format: DEFAULT_FORMAT.to_string(),
            filter: ScanFilter::Any,
            ffmpeg_path: None,
            extra_search_dirs: Vec::new(),
            search_system_path: true,
        }
    }
}

impl JoinerConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            JoinError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
            .map_err(|e| JoinError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Apply overrides from the process environment
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(CHUNK_SIZE_VAR) {
            self.chunk_size = raw.trim().parse().map_err(|_| {
                JoinError::Config(format!("{} must be a positive integer, got '{}'", CHUNK_SIZE_VAR, raw))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(JoinError::Config("chunk_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Encoder search configured from this file
    pub fn locator(&self) -> EncoderLocator {
        EncoderLocator::new()
            .with_override(self.ffmpeg_path.clone())
            .with_extra_dirs(self.extra_search_dirs.clone())
            .with_system_path(self.search_system_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = JoinerConfig::default();
        assert_eq!(config.chunk_size, 20);
        assert_eq!(config.default_format, "mp4");
        assert_eq!(config.filter, ScanFilter::Any);
        assert!(config.search_system_path);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = JoinerConfig::from_json(
            r#"{"chunk_size": 5, "filter": {"policy": "extensions", "extensions": ["mp4", "mov"]}}"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 5);
        assert_eq!(config.default_format, "mp4");
        assert_eq!(
            config.filter,
            ScanFilter::Extensions(vec!["mp4".to_string(), "mov".to_string()])
        );

        let sniff = JoinerConfig::from_json(r#"{"filter": {"policy": "sniff"}}"#).unwrap();
        assert_eq!(sniff.filter, ScanFilter::Sniff);
    }

    #[test]
    fn test_thread_count_is_not_configurable() {
        let config = JoinerConfig::from_json(r#"{"encode_threads": 8, "chunk_size": 4}"#).unwrap();
        assert_eq!(config.chunk_size, 4);
        let written = serde_json::to_value(&config).unwrap();
        assert!(written.get("encode_threads").is_none());
    }

    #[test]
    fn test_env_override() {
        let config = JoinerConfig::default()
            .with_env_from(|key| (key == CHUNK_SIZE_VAR).then(|| "7".to_string()))
            .unwrap();
        assert_eq!(config.chunk_size, 7);

        let err = JoinerConfig::default()
            .with_env_from(|_| Some("zero".to_string()))
            .unwrap_err();
        assert!(matches!(err, JoinError::Config(_)));

        let err = JoinerConfig::default()
            .with_env_from(|_| Some("0".to_string()))
            .unwrap_err();
        assert!(matches!(err, JoinError::Config(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("towel.json");
        std::fs::write(&path, r#"{"ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg", "search_system_path": false}"#)
            .unwrap();

        let config = JoinerConfig::load(&path).unwrap();
        assert_eq!(config.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
        let locator = config.locator();
        assert!(!locator.search_system_path);

        assert!(JoinerConfig::load(&dir.path().join("missing.json")).is_err());
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JoinerConfig::load(&path), Err(JoinError::Config(_))));
    }
}
