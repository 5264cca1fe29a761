//! Fact rows, decoded facts and visits.
//!
//! # Responsibility
//! - Define the single physical row shape shared by every value type.
//! - Define the decoded fact used by working sets and resolvers.
//!
//! # Invariants
//! - Exactly one of `numeric_value`, `text_value`, `structured_payload` is
//!   authoritative for a row; which one is decided by its value type codec.
//! - `unit_code` is only set on numeric rows.
//! - Timestamps are Unix epoch milliseconds.

use crate::model::concept::ValueType;
use crate::model::value::ObservationValue;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type PatientId = Uuid;
pub type VisitId = Uuid;

/// Identity of one fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactKey {
    pub patient_id: PatientId,
    pub visit_id: VisitId,
    pub concept_code: String,
}

impl FactKey {
    pub fn new(patient_id: PatientId, visit_id: VisitId, concept_code: impl Into<String>) -> Self {
        Self {
            patient_id,
            visit_id,
            concept_code: concept_code.into(),
        }
    }
}

impl Display for FactKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.patient_id, self.visit_id, self.concept_code
        )
    }
}

/// Persisted fact row.
///
/// `structured_payload` is the raw JSON object text exactly as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactRow {
    pub patient_id: PatientId,
    pub visit_id: VisitId,
    pub concept_code: String,
    pub value_type: ValueType,
    pub numeric_value: Option<f64>,
    pub text_value: Option<String>,
    pub unit_code: Option<String>,
    pub structured_payload: Option<String>,
    pub recorded_at: i64,
    pub category: String,
    pub source_system: String,
}

impl FactRow {
    pub fn key(&self) -> FactKey {
        FactKey::new(self.patient_id, self.visit_id, self.concept_code.as_str())
    }
}

/// Decoded fact: a row whose value slots were interpreted by its codec.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationFact {
    pub key: FactKey,
    pub value_type: ValueType,
    pub value: ObservationValue,
    pub recorded_at: i64,
    pub category: String,
    pub source_system: String,
}

/// One encounter of a patient; its start date anchors previous-value lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub visit_id: VisitId,
    pub patient_id: PatientId,
    /// Epoch milliseconds.
    pub started_at: i64,
    pub label: Option<String>,
}

impl Visit {
    /// Creates a visit with a generated stable ID.
    pub fn new(patient_id: PatientId, started_at: i64) -> Self {
        Self::with_id(Uuid::new_v4(), patient_id, started_at)
    }

    pub fn with_id(visit_id: VisitId, patient_id: PatientId, started_at: i64) -> Self {
        Self {
            visit_id,
            patient_id,
            started_at,
            label: None,
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
