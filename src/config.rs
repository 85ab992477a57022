//! Runtime configuration, read from the environment at startup.
//!
//! | variable                  | default                          |
//! |---------------------------|----------------------------------|
//! | `STREAKLINE_PORT`         | `3000`                           |
//! | `STREAKLINE_BACKEND`      | `sqlite` (`memory`, `remote`)    |
//! | `STREAKLINE_DATABASE_URL` | `sqlite:streakline.db?mode=rwc`  |
//! | `STREAKLINE_REMOTE_URL`   | required for `remote`            |
//! | `STREAKLINE_REMOTE_KEY`   | required for `remote`            |

use std::env;
use std::fmt;
use std::sync::Arc;

use crate::store::{HabitStore, MemoryStore, RemoteStore, SqliteStore};

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:streakline.db?mode=rwc";

#[derive(Clone, PartialEq, Eq)]
pub enum Backend {
    Sqlite { database_url: String },
    Memory,
    Remote { base_url: String, api_key: String },
}

// Hand-written so the remote key never reaches logs or panic messages.
impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite { database_url } => f
                .debug_struct("Sqlite")
                .field("database_url", database_url)
                .finish(),
            Backend::Memory => f.write_str("Memory"),
            Backend::Remote { base_url, .. } => f
                .debug_struct("Remote")
                .field("base_url", base_url)
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub backend: Backend,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a valid port number, got '{value}'")]
    InvalidPort { name: &'static str, value: String },

    #[error("unknown backend '{0}', expected sqlite, memory or remote")]
    UnknownBackend(String),

    #[error("{0} is required for the remote backend")]
    Missing(&'static str),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("STREAKLINE_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidPort {
                name: "STREAKLINE_PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let backend = match lookup("STREAKLINE_BACKEND").as_deref().unwrap_or("sqlite") {
            "sqlite" => Backend::Sqlite {
                database_url: lookup("STREAKLINE_DATABASE_URL")
                    .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            },
            "memory" => Backend::Memory,
            "remote" => Backend::Remote {
                base_url: lookup("STREAKLINE_REMOTE_URL")
                    .ok_or(ConfigError::Missing("STREAKLINE_REMOTE_URL"))?,
                api_key: lookup("STREAKLINE_REMOTE_KEY")
                    .ok_or(ConfigError::Missing("STREAKLINE_REMOTE_KEY"))?,
            },
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        Ok(Self { port, backend })
    }

    /// Open the configured store.
    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn HabitStore>> {
        let store: Arc<dyn HabitStore> = match &self.backend {
            Backend::Sqlite { database_url } => Arc::new(SqliteStore::new(database_url).await?),
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Remote { base_url, api_key } => Arc::new(RemoteStore::new(base_url, api_key)),
        };
        Ok(store)
    }
}

impl Backend {
    /// Short label for logs; never includes credentials.
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Sqlite { .. } => "sqlite",
            Backend::Memory => "memory",
            Backend::Remote { .. } => "remote",
        }
    }
}
