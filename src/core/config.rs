//! Runtime configuration loaded from `labbook.toml`, with environment overrides.

use crate::core::error::{LabbookError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "labbook.toml";
pub const ENV_DB_PATH: &str = "LABBOOK_DB_PATH";
pub const ENV_IMPORT_POLICY: &str = "LABBOOK_IMPORT_POLICY";
pub const ENV_LOG: &str = "LABBOOK_LOG";

/// Path value that selects a private in-memory store.
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabbookConfig {
    pub store: StoreConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "labbook.db".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            ..Self::default()
        }
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// What to do when an imported experiment's name already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave the existing experiment alone and count the entry as skipped.
    #[default]
    Skip,
    /// Replace the existing experiment's fields and notes with the entry's.
    /// Its `updated_at` still moves forward.
    Overwrite,
    /// Abort the whole import on the first conflict.
    FailFast,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::FailFast => "fail_fast",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_conflict_policy(raw: &str) -> Result<ConflictPolicy> {
    match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "skip" => Ok(ConflictPolicy::Skip),
        "overwrite" => Ok(ConflictPolicy::Overwrite),
        "fail_fast" => Ok(ConflictPolicy::FailFast),
        other => Err(LabbookError::ValidationError(format!(
            "Unknown conflict policy '{}'. Must be one of: skip, overwrite, fail_fast",
            other
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

pub fn parse_config(content: &str) -> Result<LabbookConfig> {
    toml::from_str(content).map_err(|e| LabbookError::ConfigError(e.to_string()))
}

/// Load `labbook.toml` from `dir`. A missing file yields defaults.
/// Environment overrides are applied on top in both cases.
pub fn load_config(dir: &Path) -> Result<LabbookConfig> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    let mut config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(LabbookError::IoError)?;
        parse_config(&content)?
    } else {
        LabbookConfig::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// `lookup` is `std::env::var` in production; tests pass a map.
pub fn apply_env_overrides<F>(config: &mut LabbookConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.trim().is_empty()) {
        config.store.path = path;
    }
    if let Some(raw) = lookup(ENV_IMPORT_POLICY) {
        config.import.conflict_policy = parse_conflict_policy(&raw)
            .map_err(|e| LabbookError::ConfigError(e.to_string()))?;
    }
    if let Some(filter) = lookup(ENV_LOG).filter(|f| !f.trim().is_empty()) {
        config.logging.filter = filter;
    }
    Ok(())
}
