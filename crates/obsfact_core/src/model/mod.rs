//! Observation domain model.
//!
//! # Responsibility
//! - Define the canonical fact shape shared by every observation value type.
//! - Define concepts, visits and decoded observation values.
//!
//! # Invariants
//! - Every fact is identified by `(patient_id, visit_id, concept_code)`.
//! - Clearing a value deletes the fact; empty rows are never stored.

pub mod concept;
pub mod fact;
pub mod value;
