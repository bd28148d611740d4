// ⚙️ Configuration - TOML file + compiled defaults
//
// Resolution order for the config file:
//   1. Explicit path (command-line argument / environment variable)
//   2. ./recognition-wall.toml if present
//   3. Compiled defaults
//
// Every key is optional; missing keys fall back to the defaults below.

use crate::error::{Error, Result};
use crate::import::ImportOptions;
use crate::timeline::SchedulePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "recognition-wall.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding records, assets and the audit trail
    pub database_path: PathBuf,

    pub schedule: SchedulePolicy,
    pub import: ImportOptions,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("recognition-wall.db"),
            schedule: SchedulePolicy::default(),
            import: ImportOptions::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a specific file; a missing file is an error
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, else the default file if present, else defaults
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            tracing::debug!(path = %fallback.display(), "using config file from working directory");
            return Self::load(fallback);
        }

        Ok(Config::default())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        let durations = [
            ("separator_ms", s.separator_ms),
            ("standard_slide_ms", s.standard_slide_ms),
            ("extended_slide_ms", s.extended_slide_ms),
            ("empty_ms", s.empty_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(Error::Config(format!("schedule.{} must be greater than 0", name)));
            }
        }

        if !(s.quote_split > 0.0 && s.quote_split < 1.0) {
            return Err(Error::Config(format!(
                "schedule.quote_split must be between 0 and 1 (exclusive), got {}",
                s.quote_split
            )));
        }

        if !self.import.delimiter.is_ascii() || self.import.delimiter == '"' {
            return Err(Error::Config(format!(
                "import.delimiter must be a single ASCII character other than '\"', got {:?}",
                self.import.delimiter
            )));
        }

        Ok(())
    }
}
