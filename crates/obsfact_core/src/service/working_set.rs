//! Per-visit editable view over observation facts.
//!
//! # Responsibility
//! - Hold the persisted baseline and the local edit overlay of one visit.
//! - Derive dirty state and keep completion counters current on every edit.
//! - Orchestrate saves without losing edits made while a write is in flight.
//!
//! # Invariants
//! - A concept is dirty iff it has an edit not equivalent to its baseline.
//! - Every mutation bumps the concept's revision. A save rebases a concept
//!   only when its revision is unchanged since the snapshot or its current
//!   value equals what was written; otherwise the current value stays dirty.
//! - Empty values are persisted as deletes, never as rows.
//! - No I/O happens outside `load` and `SaveBatch::write`.
//!
//! A working set is mutated from one logical thread and does no locking.
//! The save protocol is split into `prepare_save` → `SaveBatch::write` →
//! `complete_save` so edits may land between snapshot and completion.

use crate::codec::CodecRegistry;
use crate::model::concept::{Concept, ValueType};
use crate::model::fact::{now_epoch_ms, FactKey, FactRow, ObservationFact, PatientId, Visit, VisitId};
use crate::model::value::ObservationValue;
use crate::repo::concept_catalog::ConceptCatalog;
use crate::repo::fact_repo::FactRepository;
use crate::service::stats::{CompletionStats, CompletionTracker};
use crate::service::{ObservationError, ObservationResult};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_SOURCE_SYSTEM: &str = "obsfact";

/// Options applied to facts written by a working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSetOptions {
    /// Written to `source_system` of every saved fact.
    pub source_system: String,
}

impl Default for WorkingSetOptions {
    fn default() -> Self {
        Self {
            source_system: DEFAULT_SOURCE_SYSTEM.to_string(),
        }
    }
}

/// Per-concept result of a save.
#[derive(Debug)]
pub enum SaveOutcome {
    Upserted,
    Deleted,
    /// Persisted, but a newer edit arrived meanwhile and stays dirty.
    Skipped(ObservationError),
    /// Not persisted; the concept stays dirty.
    Failed(ObservationError),
}

/// Outcome of one save call, keyed by concept code.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub outcomes: BTreeMap<String, SaveOutcome>,
}

impl SaveReport {
    pub fn outcome(&self, concept_code: &str) -> Option<&SaveOutcome> {
        self.outcomes.get(concept_code)
    }

    /// Number of repository writes the save performed.
    pub fn write_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| !matches!(outcome, SaveOutcome::Failed(_)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ObservationError)> {
        self.outcomes.iter().filter_map(|(code, outcome)| match outcome {
            SaveOutcome::Failed(err) => Some((code.as_str(), err)),
            _ => None,
        })
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|(code, outcome)| match outcome {
            SaveOutcome::Skipped(_) => Some(code.as_str()),
            _ => None,
        })
    }

    /// True when every snapshotted concept was persisted and rebased.
    pub fn is_clean(&self) -> bool {
        self.outcomes
            .values()
            .all(|outcome| matches!(outcome, SaveOutcome::Upserted | SaveOutcome::Deleted))
    }
}

#[derive(Debug, Clone)]
enum PlannedWrite {
    Upsert {
        row: FactRow,
        fact: Box<ObservationFact>,
    },
    Delete(FactKey),
}

#[derive(Debug)]
struct PendingWrite {
    concept_code: String,
    revision: u64,
    planned: ObservationResult<PlannedWrite>,
}

/// Snapshot of dirty concepts taken by `WorkingSet::prepare_save`.
///
/// Holds encoded rows only; it does not borrow the working set, so edits can
/// continue while the batch is written.
#[derive(Debug)]
pub struct SaveBatch {
    visit_id: VisitId,
    entries: Vec<PendingWrite>,
}

impl SaveBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn concept_codes(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.concept_code.as_str())
            .collect()
    }

    /// Performs the repository writes. Each concept is written independently.
    pub fn write<R: FactRepository + ?Sized>(self, repo: &R) -> WrittenBatch {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            let result = entry.planned.and_then(|planned| {
                let written = match &planned {
                    PlannedWrite::Upsert { row, .. } => repo.upsert_fact(row),
                    PlannedWrite::Delete(key) => repo.delete_fact(key).map(|_| ()),
                };
                written.map(|()| planned).map_err(ObservationError::from)
            });
            if let Err(err) = &result {
                warn!(
                    "event=fact_write module=working_set status=error concept={} error_code={} retryable={} error={}",
                    entry.concept_code,
                    err.code(),
                    err.is_retryable(),
                    err
                );
            }
            entries.push(WrittenEntry {
                concept_code: entry.concept_code,
                revision: entry.revision,
                result,
            });
        }
        WrittenBatch {
            visit_id: self.visit_id,
            entries,
        }
    }
}

#[derive(Debug)]
struct WrittenEntry {
    concept_code: String,
    revision: u64,
    result: ObservationResult<PlannedWrite>,
}

/// Write results waiting to be applied by `WorkingSet::complete_save`.
#[derive(Debug)]
pub struct WrittenBatch {
    visit_id: VisitId,
    entries: Vec<WrittenEntry>,
}

/// Editable in-memory view of one visit's observations.
pub struct WorkingSet {
    visit: Visit,
    codecs: Arc<CodecRegistry>,
    options: WorkingSetOptions,
    concepts: HashMap<String, Concept>,
    baseline: BTreeMap<String, ObservationFact>,
    edited: BTreeMap<String, ObservationValue>,
    dirty: BTreeSet<String>,
    revisions: HashMap<String, u64>,
    completion: CompletionTracker,
}

impl WorkingSet {
    /// Creates an empty working set for a visit with no persisted facts.
    pub fn new(visit: Visit, codecs: Arc<CodecRegistry>, options: WorkingSetOptions) -> Self {
        Self {
            visit,
            codecs,
            options,
            concepts: HashMap::new(),
            baseline: BTreeMap::new(),
            edited: BTreeMap::new(),
            dirty: BTreeSet::new(),
            revisions: HashMap::new(),
            completion: CompletionTracker::default(),
        }
    }

    /// Loads a visit's facts and decodes them into the baseline.
    ///
    /// # Errors
    /// - `Repository` when the fact read fails.
    /// - `Encoding`/`Validation` when a stored row cannot be decoded; a
    ///   corrupt row is reported instead of being silently dropped.
    pub fn load<R: FactRepository + ?Sized>(
        repo: &R,
        codecs: Arc<CodecRegistry>,
        visit: Visit,
        options: WorkingSetOptions,
    ) -> ObservationResult<Self> {
        let started_at = Instant::now();
        let rows = repo.list_visit_facts(visit.patient_id, visit.visit_id)?;
        let mut working_set = Self::new(visit, codecs, options);

        for row in &rows {
            let fact = working_set.codecs.decode(row).map_err(|err| {
                error!(
                    "event=working_set_load module=working_set status=error concept={} error={}",
                    row.concept_code, err
                );
                ObservationError::codec(&row.concept_code, err)
            })?;
            working_set
                .baseline
                .insert(fact.key.concept_code.clone(), fact);
        }

        info!(
            "event=working_set_load module=working_set status=ok visit={} facts={} duration_ms={}",
            working_set.visit.visit_id,
            working_set.baseline.len(),
            started_at.elapsed().as_millis()
        );
        Ok(working_set)
    }

    pub fn visit(&self) -> &Visit {
        &self.visit
    }

    pub fn patient_id(&self) -> PatientId {
        self.visit.patient_id
    }

    pub fn visit_id(&self) -> VisitId {
        self.visit.visit_id
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Makes a concept editable without tracking its category.
    pub fn register_concept(&mut self, concept: Concept) {
        self.concepts.insert(concept.code.clone(), concept);
    }

    pub fn concept(&self, concept_code: &str) -> Option<&Concept> {
        self.concepts.get(concept_code)
    }

    /// Loads a category from the catalog and starts tracking its completion.
    pub fn track_category<C: ConceptCatalog + ?Sized>(
        &mut self,
        catalog: &C,
        category: &str,
    ) -> ObservationResult<CompletionStats> {
        let concepts = catalog.list_concepts_by_category(category)?;
        Ok(self.track_concepts(category, concepts))
    }

    /// Starts tracking completion for `category` over the given concepts.
    ///
    /// Seeds counters with one scan; later updates are incremental.
    pub fn track_concepts(&mut self, category: &str, concepts: Vec<Concept>) -> CompletionStats {
        let mut states = Vec::with_capacity(concepts.len());
        for concept in concepts {
            states.push((concept.code.clone(), self.is_filled(&concept.code)));
            self.register_concept(concept);
        }
        self.completion.track(category, states);
        debug!(
            "event=track_category module=working_set status=ok category={category}"
        );
        self.completion.category_stats(category).unwrap_or_default()
    }

    pub fn tracked_categories(&self) -> Vec<&str> {
        self.completion.categories().collect()
    }

    /// Concept codes of a tracked category in catalog order.
    pub fn category_concepts(&self, category: &str) -> Option<&[String]> {
        self.completion.category_concepts(category)
    }

    /// Completion of a tracked category, served from counters.
    pub fn category_stats(&self, category: &str) -> Option<CompletionStats> {
        self.completion.category_stats(category)
    }

    /// Completion across all tracked categories.
    pub fn overall_stats(&self) -> CompletionStats {
        self.completion.overall_stats()
    }

    /// Records an edit.
    ///
    /// Numeric values without a unit inherit the concept's default unit.
    ///
    /// # Errors
    /// - `ConceptNotFound` when the concept is neither registered nor in the
    ///   baseline.
    /// - `Validation` when the value violates the concept's value type; the
    ///   edit is not applied.
    pub fn set_value(&mut self, concept_code: &str, value: ObservationValue) -> ObservationResult<()> {
        let value_type = self.value_type_of(concept_code)?;
        let value = self.with_default_unit(concept_code, value);
        self.codecs
            .validate(&value_type, &value)
            .map_err(|err| ObservationError::codec(concept_code, err))?;

        self.mutate(concept_code, true, |ws| {
            ws.edited.insert(concept_code.to_string(), value);
        });
        Ok(())
    }

    /// Reverts a concept to its baseline. Returns whether an edit existed.
    pub fn discard(&mut self, concept_code: &str) -> bool {
        if !self.edited.contains_key(concept_code) {
            return false;
        }
        self.mutate(concept_code, true, |ws| {
            ws.edited.remove(concept_code);
        });
        true
    }

    /// Reverts every edit. Returns the number of discarded edits.
    pub fn discard_all(&mut self) -> usize {
        let codes: Vec<String> = self.edited.keys().cloned().collect();
        codes.iter().filter(|code| self.discard(code)).count()
    }

    pub fn is_dirty(&self, concept_code: &str) -> bool {
        self.dirty.contains(concept_code)
    }

    pub fn unsaved_count(&self) -> usize {
        self.dirty.len()
    }

    /// Dirty concept codes in ascending order.
    pub fn dirty_concepts(&self) -> Vec<&str> {
        self.dirty.iter().map(String::as_str).collect()
    }

    pub fn baseline_fact(&self, concept_code: &str) -> Option<&ObservationFact> {
        self.baseline.get(concept_code)
    }

    pub fn baseline_value(&self, concept_code: &str) -> Option<&ObservationValue> {
        self.baseline.get(concept_code).map(|fact| &fact.value)
    }

    pub fn edited_value(&self, concept_code: &str) -> Option<&ObservationValue> {
        self.edited.get(concept_code)
    }

    /// Edited value when present, otherwise baseline. May be empty.
    pub fn effective_value(&self, concept_code: &str) -> Option<&ObservationValue> {
        self.edited_value(concept_code)
            .or_else(|| self.baseline_value(concept_code))
    }

    /// Whether the effective value is non-empty.
    pub fn is_filled(&self, concept_code: &str) -> bool {
        self.effective_value(concept_code)
            .is_some_and(|value| !value.is_empty())
    }

    /// Snapshots dirty concepts (all, or the given subset) and encodes them.
    ///
    /// Concepts that fail encoding are carried as per-concept failures and
    /// never reach the repository.
    pub fn prepare_save(&self, concept_codes: Option<&[&str]>) -> SaveBatch {
        let selected: Vec<&String> = match concept_codes {
            None => self.dirty.iter().collect(),
            Some(codes) => self
                .dirty
                .iter()
                .filter(|code| codes.contains(&code.as_str()))
                .collect(),
        };

        let recorded_at = now_epoch_ms();
        let entries = selected
            .into_iter()
            .map(|code| PendingWrite {
                concept_code: code.clone(),
                revision: self.revision(code),
                planned: self.plan_write(code, recorded_at),
            })
            .collect();

        SaveBatch {
            visit_id: self.visit.visit_id,
            entries,
        }
    }

    /// Applies write results to the baseline.
    ///
    /// The baseline always tracks what was persisted. A concept whose current
    /// value still matches what was written is rebased and clean. Any other
    /// concept keeps its current value (including a revert made by `discard`)
    /// as an edit, stays dirty and is reported as `Skipped(ConflictSkip)`.
    ///
    /// A batch prepared by another working set is not applied; every entry is
    /// reported as `Failed(VisitMismatch)`.
    pub fn complete_save(&mut self, written: WrittenBatch) -> SaveReport {
        let mut report = SaveReport::default();
        if written.visit_id != self.visit.visit_id {
            error!(
                "event=working_set_save module=working_set status=error error_code=visit_mismatch batch_visit={} visit={}",
                written.visit_id, self.visit.visit_id
            );
            for entry in written.entries {
                report.outcomes.insert(
                    entry.concept_code,
                    SaveOutcome::Failed(ObservationError::VisitMismatch {
                        expected: self.visit.visit_id,
                        found: written.visit_id,
                    }),
                );
            }
            return report;
        }

        for entry in written.entries {
            let code = entry.concept_code;
            let planned = match entry.result {
                Ok(planned) => planned,
                Err(err) => {
                    report.outcomes.insert(code, SaveOutcome::Failed(err));
                    continue;
                }
            };

            let current = self
                .effective_value(&code)
                .cloned()
                .unwrap_or(ObservationValue::Empty);
            let (outcome, persisted) = match &planned {
                PlannedWrite::Upsert { fact, .. } => (SaveOutcome::Upserted, Some(&fact.value)),
                PlannedWrite::Delete(_) => (SaveOutcome::Deleted, None),
            };
            let unchanged = self.revision(&code) == entry.revision
                || ObservationValue::equivalent(Some(&current), persisted);

            self.mutate(&code, false, |ws| {
                match planned {
                    PlannedWrite::Upsert { fact, .. } => {
                        ws.baseline.insert(code.clone(), *fact);
                    }
                    PlannedWrite::Delete(_) => {
                        ws.baseline.remove(&code);
                    }
                }
                if unchanged {
                    ws.edited.remove(&code);
                } else {
                    ws.edited.insert(code.clone(), current);
                }
            });

            let outcome = if unchanged {
                outcome
            } else {
                debug!(
                    "event=working_set_save module=working_set status=conflict concept={code}"
                );
                SaveOutcome::Skipped(ObservationError::ConflictSkip {
                    concept_code: code.clone(),
                })
            };
            report.outcomes.insert(code, outcome);
        }
        report
    }

    /// Saves dirty concepts (all, or the given subset) through `repo`.
    pub fn save<R: FactRepository + ?Sized>(
        &mut self,
        repo: &R,
        concept_codes: Option<&[&str]>,
    ) -> SaveReport {
        let started_at = Instant::now();
        let batch = self.prepare_save(concept_codes);
        if batch.is_empty() {
            debug!("event=working_set_save module=working_set status=noop");
            return SaveReport::default();
        }

        let report = self.complete_save(batch.write(repo));
        let failed = report.failures().count();
        info!(
            "event=working_set_save module=working_set status={} visit={} concepts={} failed={} conflicts={} duration_ms={}",
            if failed == 0 { "ok" } else { "partial" },
            self.visit.visit_id,
            report.outcomes.len(),
            failed,
            report.conflicts().count(),
            started_at.elapsed().as_millis()
        );
        report
    }

    fn plan_write(&self, concept_code: &str, recorded_at: i64) -> ObservationResult<PlannedWrite> {
        let key = FactKey::new(self.visit.patient_id, self.visit.visit_id, concept_code);
        let value = self
            .edited
            .get(concept_code)
            .cloned()
            .unwrap_or(ObservationValue::Empty);
        if value.is_empty() {
            return Ok(PlannedWrite::Delete(key));
        }

        let fact = ObservationFact {
            key,
            value_type: self.value_type_of(concept_code)?,
            value,
            recorded_at,
            category: self.category_of(concept_code),
            source_system: self.options.source_system.clone(),
        };
        let row = self
            .codecs
            .encode(&fact)
            .map_err(|err| ObservationError::codec(concept_code, err))?;
        Ok(PlannedWrite::Upsert {
            row,
            fact: Box::new(fact),
        })
    }

    /// Runs `change` and keeps dirty flag, revision and counters in step.
    fn mutate(&mut self, concept_code: &str, bump_revision: bool, change: impl FnOnce(&mut Self)) {
        let was_filled = self.is_filled(concept_code);
        change(self);
        if bump_revision {
            *self.revisions.entry(concept_code.to_string()).or_insert(0) += 1;
        }
        self.refresh_dirty(concept_code);
        let now_filled = self.is_filled(concept_code);
        self.completion
            .record_change(concept_code, was_filled, now_filled);
    }

    fn refresh_dirty(&mut self, concept_code: &str) {
        let dirty = match self.edited.get(concept_code) {
            Some(edited) => !ObservationValue::equivalent(
                Some(edited),
                self.baseline_value(concept_code),
            ),
            None => false,
        };
        if dirty {
            self.dirty.insert(concept_code.to_string());
        } else {
            self.dirty.remove(concept_code);
        }
    }

    fn revision(&self, concept_code: &str) -> u64 {
        self.revisions.get(concept_code).copied().unwrap_or(0)
    }

    fn value_type_of(&self, concept_code: &str) -> ObservationResult<ValueType> {
        if let Some(concept) = self.concepts.get(concept_code) {
            return Ok(concept.value_type.clone());
        }
        self.baseline
            .get(concept_code)
            .map(|fact| fact.value_type.clone())
            .ok_or_else(|| ObservationError::ConceptNotFound(concept_code.to_string()))
    }

    fn category_of(&self, concept_code: &str) -> String {
        self.concepts
            .get(concept_code)
            .map(|concept| concept.category.clone())
            .or_else(|| {
                self.baseline
                    .get(concept_code)
                    .map(|fact| fact.category.clone())
            })
            .unwrap_or_default()
    }

    fn with_default_unit(&self, concept_code: &str, value: ObservationValue) -> ObservationValue {
        match value {
            ObservationValue::Numeric { value, unit: None } => ObservationValue::Numeric {
                value,
                unit: self
                    .concepts
                    .get(concept_code)
                    .and_then(|concept| concept.default_unit.clone()),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkingSet, WorkingSetOptions};
    use crate::codec::CodecRegistry;
    use crate::db::open_db_in_memory;
    use crate::model::concept::{Concept, ValueType};
    use crate::model::fact::Visit;
    use crate::model::value::ObservationValue;
    use crate::repo::fact_repo::SqliteFactRepository;
    use crate::service::ObservationError;
    use std::sync::Arc;
    use uuid::Uuid;

    fn working_set() -> WorkingSet {
        let visit = Visit::new(Uuid::new_v4(), 1_700_000_000_000);
        let mut ws = WorkingSet::new(
            visit,
            Arc::new(CodecRegistry::with_builtin_codecs()),
            WorkingSetOptions::default(),
        );
        ws.register_concept(
            Concept::new("WEIGHT", "Body weight", ValueType::Numeric, "vitals")
                .with_default_unit("kg"),
        );
        ws.register_concept(Concept::new("NOTE", "Note", ValueType::Text, "notes"));
        ws
    }

    #[test]
    fn set_value_marks_dirty_and_discard_clears() {
        let mut ws = working_set();
        ws.set_value("WEIGHT", ObservationValue::numeric(70.0)).unwrap();
        assert!(ws.is_dirty("WEIGHT"));
        assert_eq!(ws.unsaved_count(), 1);

        assert!(ws.discard("WEIGHT"));
        assert!(!ws.is_dirty("WEIGHT"));
        assert_eq!(ws.edited_value("WEIGHT"), None);
        assert!(!ws.discard("WEIGHT"));
    }

    #[test]
    fn numeric_without_unit_inherits_default_unit() {
        let mut ws = working_set();
        ws.set_value("WEIGHT", ObservationValue::numeric(70.0)).unwrap();
        assert_eq!(
            ws.edited_value("WEIGHT"),
            Some(&ObservationValue::numeric_with_unit(70.0, "kg"))
        );
    }

    #[test]
    fn clearing_a_never_saved_concept_is_not_dirty() {
        let mut ws = working_set();
        ws.set_value("NOTE", ObservationValue::text("draft")).unwrap();
        ws.set_value("NOTE", ObservationValue::text("")).unwrap();
        assert!(!ws.is_dirty("NOTE"));
        assert!(ws.prepare_save(None).is_empty());
    }

    #[test]
    fn invalid_value_is_rejected_without_applying() {
        let mut ws = working_set();
        let err = ws
            .set_value("WEIGHT", ObservationValue::numeric(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, ObservationError::Validation { .. }));
        assert_eq!(ws.edited_value("WEIGHT"), None);

        let err = ws
            .set_value("WEIGHT", ObservationValue::text("heavy"))
            .unwrap_err();
        assert!(matches!(err, ObservationError::Validation { .. }));
    }

    #[test]
    fn unknown_concept_is_not_found() {
        let mut ws = working_set();
        let err = ws
            .set_value("PULSE", ObservationValue::numeric(60.0))
            .unwrap_err();
        assert!(matches!(err, ObservationError::ConceptNotFound(code) if code == "PULSE"));
    }

    #[test]
    fn batch_from_another_visit_is_reported_as_failed() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteFactRepository::new(&conn);
        let mut source = working_set();
        let mut target = working_set();
        source
            .set_value("NOTE", ObservationValue::text("elsewhere"))
            .unwrap();

        let written = source.prepare_save(None).write(&repo);
        let report = target.complete_save(written);

        assert!(!report.is_clean());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            ("NOTE", ObservationError::VisitMismatch { .. })
        ));
        assert_eq!(target.baseline_value("NOTE"), None);
        assert!(source.is_dirty("NOTE"));
    }
}
