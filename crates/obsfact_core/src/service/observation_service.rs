//! Observation use-case service.
//!
//! # Responsibility
//! - Provide stable entry points for opening, editing and saving visits.
//! - Wire one repository and one codec registry into working sets and
//!   resolvers.
//!
//! # Invariants
//! - Service APIs never bypass working-set validation or the save protocol.
//! - Service layer remains storage-agnostic.

use crate::codec::CodecRegistry;
use crate::model::fact::{ObservationFact, PatientId, Visit, VisitId};
use crate::model::value::ObservationValue;
use crate::repo::fact_repo::{FactRepository, VisitRepository};
use crate::service::previous_value::PreviousValueResolver;
use crate::service::working_set::{SaveReport, WorkingSet, WorkingSetOptions};
use crate::service::{ObservationError, ObservationResult};
use std::sync::Arc;

/// Use-case service over fact and visit persistence.
pub struct ObservationService<R: FactRepository + VisitRepository> {
    repo: R,
    codecs: Arc<CodecRegistry>,
    options: WorkingSetOptions,
}

impl<R: FactRepository + VisitRepository> ObservationService<R> {
    /// Creates a service with built-in codecs and default options.
    pub fn new(repo: R) -> Self {
        Self::with_codecs(
            repo,
            Arc::new(CodecRegistry::with_builtin_codecs()),
            WorkingSetOptions::default(),
        )
    }

    pub fn with_codecs(repo: R, codecs: Arc<CodecRegistry>, options: WorkingSetOptions) -> Self {
        Self {
            repo,
            codecs,
            options,
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Creates and persists a new visit.
    pub fn create_visit(
        &self,
        patient_id: PatientId,
        started_at: i64,
        label: Option<String>,
    ) -> ObservationResult<Visit> {
        let mut visit = Visit::new(patient_id, started_at);
        visit.label = label;
        self.repo.create_visit(&visit)?;
        Ok(visit)
    }

    /// Returns one patient's visits, most recent first.
    pub fn list_patient_visits(&self, patient_id: PatientId) -> ObservationResult<Vec<Visit>> {
        Ok(self.repo.list_patient_visits(patient_id)?)
    }

    /// Loads the working set of an existing visit.
    ///
    /// # Errors
    /// - `VisitNotFound` when the visit does not exist.
    pub fn open_visit(&self, visit_id: VisitId) -> ObservationResult<WorkingSet> {
        let visit = self.require_visit(visit_id)?;
        WorkingSet::load(
            &self.repo,
            Arc::clone(&self.codecs),
            visit,
            self.options.clone(),
        )
    }

    /// Saves every dirty concept of `working_set`.
    pub fn save(&self, working_set: &mut WorkingSet) -> SaveReport {
        working_set.save(&self.repo, None)
    }

    /// Saves the given concepts of `working_set` when they are dirty.
    pub fn save_concepts(&self, working_set: &mut WorkingSet, concept_codes: &[&str]) -> SaveReport {
        working_set.save(&self.repo, Some(concept_codes))
    }

    /// Resolves the value recorded before visit `visit_id` started.
    pub fn resolve_previous(
        &self,
        concept_code: &str,
        visit_id: VisitId,
    ) -> ObservationResult<Option<ObservationFact>> {
        let visit = self.require_visit(visit_id)?;
        self.resolver()
            .resolve(visit.patient_id, concept_code, &visit)
    }

    /// Copies one concept's previous value into `working_set`.
    pub fn clone_previous(
        &self,
        working_set: &mut WorkingSet,
        concept_code: &str,
    ) -> ObservationResult<Option<ObservationValue>> {
        self.resolver().clone_into(working_set, concept_code)
    }

    /// Copies forward the empty concepts of a tracked category.
    pub fn clone_category(
        &self,
        working_set: &mut WorkingSet,
        category: &str,
    ) -> ObservationResult<Vec<String>> {
        self.resolver().clone_category(working_set, category)
    }

    fn resolver(&self) -> PreviousValueResolver<'_, &R> {
        PreviousValueResolver::new(&self.repo, &self.codecs)
    }

    fn require_visit(&self, visit_id: VisitId) -> ObservationResult<Visit> {
        self.repo
            .get_visit(visit_id)?
            .ok_or(ObservationError::VisitNotFound(visit_id))
    }
}
