//! Compiler configuration, loaded from ~/.solfa/config.yaml.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dsl::parser::DEFAULT_TRACK;
use crate::dsl::resolve::DEFAULT_MAX_EXPANSION;

/// Compiler configuration. Every field has a default, so a partial file
/// (or none at all) is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the implicit track used when the source has no `track`.
    #[serde(default = "Config::default_track")]
    pub default_track: String,
    /// Reject unknown instruments and out-of-range pitches after resolution.
    #[serde(default = "Config::default_check_instruments")]
    pub check_instruments: bool,
    /// Upper bound on expressions produced while expanding one movement.
    #[serde(default = "Config::default_max_expansion")]
    pub max_expansion: usize,
    /// Log level for the command-line tool when no `-v` flag is given.
    #[serde(default = "Config::default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load config from the standard path (~/.solfa/config.yaml).
    /// Returns None if the file doesn't exist or can't be parsed.
    pub fn load() -> Option<Self> {
        let path = Self::default_path()?;
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write config as YAML, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self).map_err(io::Error::other)?;
        std::fs::write(path, yaml)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".solfa").join("config.yaml"))
    }

    fn default_track() -> String {
        DEFAULT_TRACK.to_string()
    }

    fn default_check_instruments() -> bool {
        true
    }

    fn default_max_expansion() -> usize {
        DEFAULT_MAX_EXPANSION
    }

    fn default_log_level() -> String {
        "warn".to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_track: Self::default_track(),
            check_instruments: Self::default_check_instruments(),
            max_expansion: Self::default_max_expansion(),
            log_level: Self::default_log_level(),
        }
    }
}
