//! Previous-value lookup and copy-forward.
//!
//! # Invariants
//! - Only facts recorded strictly before the visit's start are candidates.
//! - Historical facts are never written; cloning goes through
//!   `WorkingSet::set_value` and is persisted only by a later save.

use crate::codec::CodecRegistry;
use crate::model::fact::{ObservationFact, PatientId, Visit};
use crate::model::value::ObservationValue;
use crate::repo::fact_repo::FactRepository;
use crate::service::working_set::WorkingSet;
use crate::service::{ObservationError, ObservationResult};
use log::{debug, warn};

/// Read-only resolver over a patient's fact history.
pub struct PreviousValueResolver<'a, R: FactRepository> {
    repo: R,
    codecs: &'a CodecRegistry,
}

impl<'a, R: FactRepository> PreviousValueResolver<'a, R> {
    pub fn new(repo: R, codecs: &'a CodecRegistry) -> Self {
        Self { repo, codecs }
    }

    /// Returns the most recent fact for `concept_code` recorded before
    /// `before_visit` started, or `None` when there is none.
    ///
    /// Rows that fail to decode are skipped.
    pub fn resolve(
        &self,
        patient_id: PatientId,
        concept_code: &str,
        before_visit: &Visit,
    ) -> ObservationResult<Option<ObservationFact>> {
        let mut history = self.repo.list_concept_history(patient_id, concept_code)?;
        history.sort_by(|left, right| right.recorded_at.cmp(&left.recorded_at));

        for row in history
            .iter()
            .filter(|row| row.recorded_at < before_visit.started_at)
        {
            match self.codecs.decode(row) {
                Ok(fact) if !fact.value.is_empty() => return Ok(Some(fact)),
                Ok(_) => continue,
                Err(err) => {
                    warn!(
                        "event=previous_value_resolve module=previous_value status=skipped concept={} visit={} error={}",
                        concept_code, row.visit_id, err
                    );
                }
            }
        }
        Ok(None)
    }

    /// Copies the previous value of one concept into the working set.
    ///
    /// Returns the copied value, or `None` when no previous value exists.
    pub fn clone_into(
        &self,
        working_set: &mut WorkingSet,
        concept_code: &str,
    ) -> ObservationResult<Option<ObservationValue>> {
        let visit = working_set.visit().clone();
        let Some(fact) = self.resolve(visit.patient_id, concept_code, &visit)? else {
            debug!(
                "event=previous_value_clone module=previous_value status=miss concept={concept_code}"
            );
            return Ok(None);
        };

        working_set.set_value(concept_code, fact.value.clone())?;
        debug!(
            "event=previous_value_clone module=previous_value status=ok concept={} source_visit={}",
            concept_code, fact.key.visit_id
        );
        Ok(Some(fact.value))
    }

    /// Copies forward every concept of a tracked category that is still empty.
    ///
    /// Returns the codes that received a value. Concepts whose previous value
    /// no longer fits their value type are skipped; repository failures abort.
    pub fn clone_category(
        &self,
        working_set: &mut WorkingSet,
        category: &str,
    ) -> ObservationResult<Vec<String>> {
        let Some(codes) = working_set.category_concepts(category) else {
            debug!(
                "event=previous_value_clone_category module=previous_value status=untracked category={category}"
            );
            return Ok(Vec::new());
        };
        let empty_codes: Vec<String> = codes
            .iter()
            .filter(|code| !working_set.is_filled(code))
            .cloned()
            .collect();

        let mut cloned = Vec::new();
        for code in empty_codes {
            match self.clone_into(working_set, &code) {
                Ok(Some(_)) => cloned.push(code),
                Ok(None) => {}
                Err(err @ ObservationError::Validation { .. }) => {
                    warn!(
                        "event=previous_value_clone module=previous_value status=skipped concept={} error_code={}",
                        code,
                        err.code()
                    );
                }
                Err(err) => return Err(err),
            }
        }

        debug!(
            "event=previous_value_clone_category module=previous_value status=ok category={} cloned={}",
            category,
            cloned.len()
        );
        Ok(cloned)
    }
}
