//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the fact, visit and concept-catalog contracts consumed by core.
//! - Isolate SQLite query details from working-set orchestration.
//!
//! # Invariants
//! - Repositories store rows as given; value semantics belong to codecs.
//! - Read paths reject malformed identity columns instead of masking them.

pub mod concept_catalog;
pub mod fact_repo;

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by fact, visit and concept persistence.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    ConceptNotFound(String),
    /// Write rejected before reaching storage.
    InvalidKey(String),
    /// Stored data cannot be mapped back to the model.
    InvalidData(String),
}

impl RepoError {
    /// Whether the same call may succeed later without any change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Db(err) => err.is_busy(),
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ConceptNotFound(code) => write!(f, "concept not found: {code}"),
            Self::InvalidKey(message) => write!(f, "invalid key: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use rusqlite::ffi;

    #[test]
    fn only_busy_storage_errors_are_retryable() {
        let busy: RepoError =
            rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None).into();
        assert!(busy.is_retryable());

        let readonly: RepoError =
            rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_READONLY), None).into();
        assert!(!readonly.is_retryable());
        assert!(!RepoError::InvalidData("bad uuid".to_string()).is_retryable());
    }
}
