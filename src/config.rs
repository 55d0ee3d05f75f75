//! Connection configuration.
//!
//! The settings a `Tdb` is built from: the database name, company and
//! default principal given by the caller, plus the `[database]` section of
//! the portal's TOML config file.
//!
//! ```toml
//! [database]
//! # how often a failed transaction is retried (default: 5)
//! retry = 5
//! # directory of the git journal; omit for a volatile in-memory store
//! path = "/var/lib/portal/db"
//! # upper bound of simultaneously open connections (default: 16)
//! max_connections = 16
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{ErrorKind, RecordId, UserId};

/// Default retry budget.
pub const DEFAULT_RETRY: u32 = 5;
/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// `[database]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

/// Config file layout. Sections other than `[database]` belong to other
/// parts of the portal and are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Immutable connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TdbConfig {
    /// Name of the database to connect to.
    pub database: String,
    /// Config file the settings were read from, if any.
    pub config_path: Option<PathBuf>,
    /// Company put into every transaction context.
    pub company: Option<RecordId>,
    /// Principal used when a unit of work names none.
    pub user: UserId,
    /// Retry budget per unit of work.
    pub retry: u32,
    /// Journal directory; `None` keeps the store in memory.
    pub storage_path: Option<PathBuf>,
    pub max_connections: usize,
}

impl TdbConfig {
    /// Settings with defaults and no config file.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            config_path: None,
            company: None,
            user: UserId::ROOT,
            retry: DEFAULT_RETRY,
            storage_path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Build settings from a config file.
    pub fn load(
        database: impl Into<String>,
        config_path: impl AsRef<Path>,
        company: Option<RecordId>,
        user: Option<UserId>,
    ) -> ConfigResult<Self> {
        let path = config_path.as_ref();
        let file = ConfigFile::from_file(path)?;
        let mut config = Self::new(database).apply(file.database)?;
        config.config_path = Some(path.to_path_buf());
        config.company = company;
        if let Some(user) = user {
            config.user = user;
        }
        Ok(config)
    }

    /// Overlay a `[database]` section.
    pub fn apply(mut self, section: DatabaseSection) -> ConfigResult<Self> {
        if let Some(retry) = section.retry {
            self.retry = retry;
        }
        if let Some(path) = section.path {
            self.storage_path = Some(path);
        }
        if let Some(max) = section.max_connections {
            if max == 0 {
                return Err(ConfigError::Invalid(
                    "max_connections must be at least 1".to_string(),
                ));
            }
            self.max_connections = max;
        }
        Ok(self)
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn user(mut self, user: UserId) -> Self {
        self.user = user;
        self
    }

    pub fn company(mut self, company: RecordId) -> Self {
        self.company = Some(company);
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}
