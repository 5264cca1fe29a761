//! Core use-case services.
//!
//! # Responsibility
//! - Hold the per-visit working set and its save protocol.
//! - Maintain completion statistics and previous-value cloning.
//! - Keep callers decoupled from codecs and storage details.
//!
//! # Invariants
//! - Validation and encoding failures are scoped to one concept.
//! - No service retries repository writes; callers decide on retry.

pub mod observation_service;
pub mod previous_value;
pub mod stats;
pub mod working_set;

use crate::codec::{CodecError, EncodingError};
use crate::model::fact::VisitId;
use crate::model::value::ValueValidationError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ObservationResult<T> = Result<T, ObservationError>;

/// Error surfaced by working set, resolver and service operations.
#[derive(Debug)]
pub enum ObservationError {
    /// Value violates its type's schema.
    Validation {
        concept_code: String,
        source: ValueValidationError,
    },
    /// Stored row or codec output is inconsistent with the value type.
    Encoding {
        concept_code: String,
        source: EncodingError,
    },
    /// Concept is neither registered nor present in the baseline.
    ConceptNotFound(String),
    VisitNotFound(VisitId),
    /// Save results were applied to a working set of another visit.
    VisitMismatch { expected: VisitId, found: VisitId },
    /// Repository I/O failure; retryable by the caller.
    Repository(RepoError),
    /// Write succeeded but the concept was edited again while it was in flight.
    ConflictSkip { concept_code: String },
}

impl ObservationError {
    pub(crate) fn codec(concept_code: &str, err: CodecError) -> Self {
        match err {
            CodecError::Validation(source) => Self::Validation {
                concept_code: concept_code.to_string(),
                source,
            },
            CodecError::Encoding(source) => Self::Encoding {
                concept_code: concept_code.to_string(),
                source,
            },
        }
    }

    /// Stable machine-readable error code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Encoding { .. } => "encoding_error",
            Self::ConceptNotFound(_) | Self::VisitNotFound(_) => "not_found",
            Self::VisitMismatch { .. } => "visit_mismatch",
            Self::Repository(_) => "repository_error",
            Self::ConflictSkip { .. } => "conflict_skip",
        }
    }

    /// Whether the caller may retry the failed operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Repository(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl Display for ObservationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation {
                concept_code,
                source,
            } => write!(f, "invalid value for {concept_code}: {source}"),
            Self::Encoding {
                concept_code,
                source,
            } => write!(f, "encoding failed for {concept_code}: {source}"),
            Self::ConceptNotFound(code) => write!(f, "concept not found: {code}"),
            Self::VisitNotFound(id) => write!(f, "visit not found: {id}"),
            Self::VisitMismatch { expected, found } => {
                write!(f, "save batch belongs to visit {found}, not {expected}")
            }
            Self::Repository(err) => write!(f, "{err}"),
            Self::ConflictSkip { concept_code } => write!(
                f,
                "{concept_code} changed while saving; kept the newer edit unsaved"
            ),
        }
    }
}

impl Error for ObservationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation { source, .. } => Some(source),
            Self::Encoding { source, .. } => Some(source),
            Self::Repository(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ObservationError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ConceptNotFound(code) => Self::ConceptNotFound(code),
            other => Self::Repository(other),
        }
    }
}
