//! Configuration - layered defaults, YAML files and environment
//!
//! Precedence (later wins):
//! 1. Built-in defaults
//! 2. User config: `<config dir>/tbom/config.yaml`
//! 3. File named by `TBOM_CONFIG`
//! 4. Environment: `TBOM_DB`, `TBOM_AUTHOR`
//!
//! The CLI applies `--db` on top of the loaded config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::error::{BomError, BomResult};

/// Default database file name
const DEFAULT_DB_FILE: &str = "tbom.db";

/// Engine and CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path
    pub database: PathBuf,

    /// Currency minor-unit digits used when displaying money
    pub currency_decimals: u32,

    /// Longest wait for the write lock before failing with contention
    pub lock_timeout_ms: u64,

    /// Internal retries on contention before surfacing the error
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    pub retry_backoff_ms: u64,

    /// Largest unrolled tree `get_tree` will build
    pub max_tree_lines: u64,

    /// Recorded on audit rows
    pub author: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            currency_decimals: 2,
            lock_timeout_ms: 5_000,
            max_retries: 3,
            retry_backoff_ms: 25,
            max_tree_lines: 10_000,
            author: default_author(),
        }
    }
}

/// Partial config as read from a file; absent keys keep earlier values
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    database: Option<PathBuf>,
    currency_decimals: Option<u32>,
    lock_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_tree_lines: Option<u64>,
    author: Option<String>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tbom")
}

fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

fn default_author() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl Config {
    /// Load the layered configuration
    pub fn load() -> BomResult<Self> {
        let mut config = Self::default();

        if let Some(dirs) = project_dirs() {
            let user_file = dirs.config_dir().join("config.yaml");
            if user_file.exists() {
                config.merge_file(&user_file)?;
            }
        }

        if let Ok(path) = std::env::var("TBOM_CONFIG") {
            config.merge_file(Path::new(&path))?;
        }

        if let Ok(db) = std::env::var("TBOM_DB") {
            config.database = PathBuf::from(db);
        }
        if let Ok(author) = std::env::var("TBOM_AUTHOR") {
            config.author = author;
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay the keys present in a YAML file
    pub fn merge_file(&mut self, path: &Path) -> BomResult<()> {
        let contents = std::fs::read_to_string(path)?;
        self.merge_yaml(&contents)
            .map_err(|e| BomError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Overlay the keys present in a YAML document
    pub fn merge_yaml(&mut self, yaml: &str) -> Result<(), String> {
        if yaml.trim().is_empty() {
            return Ok(());
        }
        let file: ConfigFile = serde_yml::from_str(yaml).map_err(|e| e.to_string())?;

        if let Some(v) = file.database {
            self.database = v;
        }
        if let Some(v) = file.currency_decimals {
            self.currency_decimals = v;
        }
        if let Some(v) = file.lock_timeout_ms {
            self.lock_timeout_ms = v;
        }
        if let Some(v) = file.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = file.retry_backoff_ms {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = file.max_tree_lines {
            self.max_tree_lines = v;
        }
        if let Some(v) = file.author {
            self.author = v;
        }
        Ok(())
    }

    /// Reject values the engine cannot honour
    pub fn validate(&self) -> BomResult<()> {
        if self.currency_decimals > 6 {
            return Err(BomError::Config(format!(
                "currency_decimals must be 0-6 (got {})",
                self.currency_decimals
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(BomError::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_tree_lines == 0 {
            return Err(BomError::Config(
                "max_tree_lines must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// Defaults pointed at a specific database file
    pub fn for_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database: path.into(),
            ..Self::default()
        }
    }
}
