//! Observation store bootstrap.
//!
//! # Responsibility
//! - Open the SQLite file (or in-memory store) that holds `visits`,
//!   `observation_facts` and the `concepts` catalog.
//! - Bring its schema to the latest migration before any repository sees it.
//! - Classify storage failures so callers can tell a busy store from a
//!   broken one.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No fact, visit or concept is read or written before migrations succeed.
//! - The core never retries; `DbError::is_busy` only reports that a retry
//!   may succeed.

use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Tables owned by the observation store, in dependency order.
pub const STORE_TABLES: [&str; 3] = ["visits", "observation_facts", "concepts"];

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The store was written by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A migration step failed; the whole run was rolled back.
    MigrationFailed {
        version: u32,
        source: rusqlite::Error,
    },
}

impl DbError {
    /// Stable machine-readable error code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) if self.is_busy() => "db_busy",
            Self::Sqlite(_) => "db_sqlite_error",
            Self::UnsupportedSchemaVersion { .. } => "db_schema_too_new",
            Self::MigrationFailed { .. } => "db_migration_failed",
        }
    }

    /// Whether SQLite gave up on a lock held by another connection.
    pub fn is_busy(&self) -> bool {
        let source = match self {
            Self::Sqlite(err) | Self::MigrationFailed { source: err, .. } => err,
            Self::UnsupportedSchemaVersion { .. } => return false,
        };
        matches!(
            source.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "observation store: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "observation store schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::MigrationFailed { version, source } => {
                write!(f, "observation store migration {version} failed: {source}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MigrationFailed { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
