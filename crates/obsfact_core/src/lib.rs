//! Core domain logic for obsfact.
//! This crate is the single source of truth for observation-fact invariants.

pub mod codec;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use codec::{
    CodecError, CodecRegistry, CodecRegistryError, CodecResult, EncodingError, StructuredCodec,
    ValueCodec,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::concept::{Concept, ValueType};
pub use model::fact::{FactKey, FactRow, ObservationFact, PatientId, Visit, VisitId};
pub use model::value::{MedicationPlan, ObservationValue, ValueValidationError};
pub use repo::concept_catalog::{ConceptCatalog, SqliteConceptCatalog};
pub use repo::fact_repo::{FactRepository, SqliteFactRepository, VisitRepository};
pub use repo::{RepoError, RepoResult};
pub use service::observation_service::ObservationService;
pub use service::previous_value::PreviousValueResolver;
pub use service::stats::{compute_category_stats, CompletionStats};
pub use service::working_set::{
    SaveBatch, SaveOutcome, SaveReport, WorkingSet, WorkingSetOptions, WrittenBatch,
};
pub use service::{ObservationError, ObservationResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
