//! Fact and visit repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist fact rows keyed by `(patient, visit, concept)`.
//! - Persist visits whose start dates anchor previous-value lookups.
//!
//! # Invariants
//! - `upsert_fact` is idempotent for identical rows.
//! - `delete_fact` on a missing row is a no-op, so retried deletes succeed.
//! - History reads are ordered by `recorded_at DESC`.

use crate::model::concept::{is_valid_concept_code, ValueType};
use crate::model::fact::{FactKey, FactRow, PatientId, Visit, VisitId};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const FACT_SELECT_SQL: &str = "SELECT
    patient_id,
    visit_id,
    concept_code,
    value_type,
    numeric_value,
    text_value,
    unit_code,
    structured_payload,
    recorded_at,
    category,
    source_system
FROM observation_facts";

const VISIT_SELECT_SQL: &str = "SELECT visit_id, patient_id, started_at, label FROM visits";

/// Fact persistence consumed by working sets and resolvers.
pub trait FactRepository {
    /// Returns every fact of one visit, ordered by concept code.
    fn list_visit_facts(&self, patient_id: PatientId, visit_id: VisitId)
        -> RepoResult<Vec<FactRow>>;
    /// Returns one patient's facts for a concept across visits, newest first.
    fn list_concept_history(
        &self,
        patient_id: PatientId,
        concept_code: &str,
    ) -> RepoResult<Vec<FactRow>>;
    /// Inserts or replaces the row with the same key.
    fn upsert_fact(&self, row: &FactRow) -> RepoResult<()>;
    /// Deletes one fact. Returns whether a row existed.
    fn delete_fact(&self, key: &FactKey) -> RepoResult<bool>;
}

/// Visit persistence.
pub trait VisitRepository {
    fn create_visit(&self, visit: &Visit) -> RepoResult<VisitId>;
    fn get_visit(&self, visit_id: VisitId) -> RepoResult<Option<Visit>>;
    /// Returns one patient's visits, most recent first.
    fn list_patient_visits(&self, patient_id: PatientId) -> RepoResult<Vec<Visit>>;
}

impl<T: FactRepository + ?Sized> FactRepository for &T {
    fn list_visit_facts(&self, patient_id: PatientId, visit_id: VisitId)
        -> RepoResult<Vec<FactRow>> {
        (**self).list_visit_facts(patient_id, visit_id)
    }

    fn list_concept_history(
        &self,
        patient_id: PatientId,
        concept_code: &str,
    ) -> RepoResult<Vec<FactRow>> {
        (**self).list_concept_history(patient_id, concept_code)
    }

    fn upsert_fact(&self, row: &FactRow) -> RepoResult<()> {
        (**self).upsert_fact(row)
    }

    fn delete_fact(&self, key: &FactKey) -> RepoResult<bool> {
        (**self).delete_fact(key)
    }
}

impl<T: VisitRepository + ?Sized> VisitRepository for &T {
    fn create_visit(&self, visit: &Visit) -> RepoResult<VisitId> {
        (**self).create_visit(visit)
    }

    fn get_visit(&self, visit_id: VisitId) -> RepoResult<Option<Visit>> {
        (**self).get_visit(visit_id)
    }

    fn list_patient_visits(&self, patient_id: PatientId) -> RepoResult<Vec<Visit>> {
        (**self).list_patient_visits(patient_id)
    }
}

/// SQLite-backed fact and visit repository.
pub struct SqliteFactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteFactRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl FactRepository for SqliteFactRepository<'_> {
    fn list_visit_facts(
        &self,
        patient_id: PatientId,
        visit_id: VisitId,
    ) -> RepoResult<Vec<FactRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "{FACT_SELECT_SQL}
             WHERE patient_id = ?1 AND visit_id = ?2
             ORDER BY concept_code ASC;"
        ))?;
        let mut rows = stmt.query(params![patient_id.to_string(), visit_id.to_string()])?;
        let mut facts = Vec::new();
        while let Some(row) = rows.next()? {
            facts.push(parse_fact_row(row)?);
        }
        Ok(facts)
    }

    fn list_concept_history(
        &self,
        patient_id: PatientId,
        concept_code: &str,
    ) -> RepoResult<Vec<FactRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "{FACT_SELECT_SQL}
             WHERE patient_id = ?1 AND concept_code = ?2
             ORDER BY recorded_at DESC, visit_id ASC;"
        ))?;
        let mut rows = stmt.query(params![patient_id.to_string(), concept_code])?;
        let mut facts = Vec::new();
        while let Some(row) = rows.next()? {
            facts.push(parse_fact_row(row)?);
        }
        Ok(facts)
    }

    fn upsert_fact(&self, row: &FactRow) -> RepoResult<()> {
        if !is_valid_concept_code(&row.concept_code) {
            return Err(RepoError::InvalidKey(format!(
                "concept code `{}`",
                row.concept_code
            )));
        }

        self.conn.execute(
            "INSERT INTO observation_facts (
                patient_id,
                visit_id,
                concept_code,
                value_type,
                numeric_value,
                text_value,
                unit_code,
                structured_payload,
                recorded_at,
                category,
                source_system
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (patient_id, visit_id, concept_code) DO UPDATE SET
                value_type = excluded.value_type,
                numeric_value = excluded.numeric_value,
                text_value = excluded.text_value,
                unit_code = excluded.unit_code,
                structured_payload = excluded.structured_payload,
                recorded_at = excluded.recorded_at,
                category = excluded.category,
                source_system = excluded.source_system,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                row.patient_id.to_string(),
                row.visit_id.to_string(),
                row.concept_code.as_str(),
                row.value_type.as_str(),
                row.numeric_value,
                row.text_value.as_deref(),
                row.unit_code.as_deref(),
                row.structured_payload.as_deref(),
                row.recorded_at,
                row.category.as_str(),
                row.source_system.as_str(),
            ],
        )?;
        Ok(())
    }

    fn delete_fact(&self, key: &FactKey) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM observation_facts
             WHERE patient_id = ?1 AND visit_id = ?2 AND concept_code = ?3;",
            params![
                key.patient_id.to_string(),
                key.visit_id.to_string(),
                key.concept_code.as_str(),
            ],
        )?;
        Ok(changed > 0)
    }
}

impl VisitRepository for SqliteFactRepository<'_> {
    fn create_visit(&self, visit: &Visit) -> RepoResult<VisitId> {
        if visit.visit_id.is_nil() || visit.patient_id.is_nil() {
            return Err(RepoError::InvalidKey("visit and patient ids must not be nil".into()));
        }

        self.conn.execute(
            "INSERT INTO visits (visit_id, patient_id, started_at, label)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                visit.visit_id.to_string(),
                visit.patient_id.to_string(),
                visit.started_at,
                visit.label.as_deref(),
            ],
        )?;
        Ok(visit.visit_id)
    }

    fn get_visit(&self, visit_id: VisitId) -> RepoResult<Option<Visit>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{VISIT_SELECT_SQL} WHERE visit_id = ?1;"))?;
        let mut rows = stmt.query([visit_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_visit_row(row)?));
        }
        Ok(None)
    }

    fn list_patient_visits(&self, patient_id: PatientId) -> RepoResult<Vec<Visit>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VISIT_SELECT_SQL}
             WHERE patient_id = ?1
             ORDER BY started_at DESC, visit_id ASC;"
        ))?;
        let mut rows = stmt.query([patient_id.to_string()])?;
        let mut visits = Vec::new();
        while let Some(row) = rows.next()? {
            visits.push(parse_visit_row(row)?);
        }
        Ok(visits)
    }
}

fn parse_fact_row(row: &Row<'_>) -> RepoResult<FactRow> {
    let value_type: String = row.get("value_type")?;
    Ok(FactRow {
        patient_id: parse_uuid(row, "observation_facts", "patient_id")?,
        visit_id: parse_uuid(row, "observation_facts", "visit_id")?,
        concept_code: row.get("concept_code")?,
        value_type: ValueType::parse(&value_type),
        numeric_value: row.get("numeric_value")?,
        text_value: row.get("text_value")?,
        unit_code: row.get("unit_code")?,
        structured_payload: row.get("structured_payload")?,
        recorded_at: row.get("recorded_at")?,
        category: row.get("category")?,
        source_system: row.get("source_system")?,
    })
}

fn parse_visit_row(row: &Row<'_>) -> RepoResult<Visit> {
    Ok(Visit {
        visit_id: parse_uuid(row, "visits", "visit_id")?,
        patient_id: parse_uuid(row, "visits", "patient_id")?,
        started_at: row.get("started_at")?,
        label: row.get("label")?,
    })
}

fn parse_uuid(row: &Row<'_>, table: &str, column: &str) -> RepoResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{text}` in {table}.{column}"))
    })
}
