//! Decoded observation values.
//!
//! # Responsibility
//! - Represent every value shape a fact can carry after decoding.
//! - Validate value-level invariants independent of storage.
//!
//! # Invariants
//! - Numbers are finite.
//! - A medication plan always names its drug.
//! - `Empty`, blank text/code and empty payloads are all "empty"; empty and
//!   absent values are equivalent for dirty tracking and statistics.

use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Ordered JSON object used for structured payloads.
///
/// Insertion order is kept so unknown keys re-encode where they were read.
pub type StructuredPayload = Map<String, Value>;

/// Typed value of one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    /// No value; saving an empty value deletes the fact.
    Empty,
    Numeric {
        value: f64,
        unit: Option<String>,
    },
    Text(String),
    /// Code from the concept's terminology, stored without surrounding whitespace.
    Coded(String),
    Medication(MedicationPlan),
    /// Payload owned by a runtime-registered codec.
    Structured(StructuredPayload),
}

impl ObservationValue {
    pub fn numeric(value: f64) -> Self {
        Self::Numeric { value, unit: None }
    }

    pub fn numeric_with_unit(value: f64, unit: impl Into<String>) -> Self {
        Self::Numeric {
            value,
            unit: Some(unit.into()),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn coded(value: impl Into<String>) -> Self {
        Self::Coded(value.into())
    }

    /// Returns whether this value counts as "not filled".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) | Self::Coded(text) => text.trim().is_empty(),
            Self::Structured(payload) => payload.is_empty(),
            Self::Numeric { .. } | Self::Medication(_) => false,
        }
    }

    /// Short shape name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Numeric { .. } => "numeric",
            Self::Text(_) => "text",
            Self::Coded(_) => "coded",
            Self::Medication(_) => "medication",
            Self::Structured(_) => "structured",
        }
    }

    /// Compares two optional values treating empty and absent as equal.
    pub fn equivalent(lhs: Option<&Self>, rhs: Option<&Self>) -> bool {
        let lhs = lhs.filter(|value| !value.is_empty());
        let rhs = rhs.filter(|value| !value.is_empty());
        lhs == rhs
    }
}

/// Structured medication plan carried by `ValueType::Medication` facts.
///
/// `extensions` keeps every payload key this codec does not recognize, in
/// the order it was read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MedicationPlan {
    pub drug_name: String,
    pub dosage: Option<f64>,
    pub dosage_unit: Option<String>,
    pub route: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub extensions: StructuredPayload,
}

impl MedicationPlan {
    pub fn new(drug_name: impl Into<String>) -> Self {
        Self {
            drug_name: drug_name.into(),
            ..Self::default()
        }
    }

    /// Validates plan invariants.
    ///
    /// # Errors
    /// - `MissingDrugName` when `drug_name` is blank.
    /// - `NonFiniteNumber` when `dosage` is NaN or infinite.
    pub fn validate(&self) -> Result<(), ValueValidationError> {
        if self.drug_name.trim().is_empty() {
            return Err(ValueValidationError::MissingDrugName);
        }
        if let Some(dosage) = self.dosage {
            if !dosage.is_finite() {
                return Err(ValueValidationError::NonFiniteNumber { field: "dosage" });
            }
        }
        Ok(())
    }
}

/// Value-level schema violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueValidationError {
    /// Value is empty where a persisted value is required.
    EmptyValue,
    /// Value shape does not match the concept's value type.
    TypeMismatch {
        expected: String,
        found: &'static str,
    },
    NonFiniteNumber {
        field: &'static str,
    },
    /// Unit code is blank or padded with whitespace.
    InvalidUnit(String),
    /// Code is padded with whitespace.
    InvalidCode(String),
    MissingDrugName,
    /// Extension key shadows a field the codec owns.
    ReservedField(String),
    /// Structured payload lacks a key required by its codec.
    MissingRequiredField(String),
}

impl Display for ValueValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyValue => write!(f, "value must not be empty"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "value type mismatch: expected {expected}, found {found}")
            }
            Self::NonFiniteNumber { field } => write!(f, "{field} must be a finite number"),
            Self::InvalidUnit(unit) => write!(f, "invalid unit code `{unit}`"),
            Self::InvalidCode(code) => write!(f, "invalid code `{code}`"),
            Self::MissingDrugName => write!(f, "medication drugName must not be empty"),
            Self::ReservedField(field) => {
                write!(f, "extension field `{field}` shadows a known field")
            }
            Self::MissingRequiredField(field) => {
                write!(f, "structured payload is missing required field `{field}`")
            }
        }
    }
}

impl Error for ValueValidationError {}

#[cfg(test)]
mod tests {
    use super::{MedicationPlan, ObservationValue, ValueValidationError};
    use serde_json::Map;

    #[test]
    fn emptiness_covers_blank_text_and_empty_payload() {
        assert!(ObservationValue::Empty.is_empty());
        assert!(ObservationValue::text("   ").is_empty());
        assert!(ObservationValue::Structured(Map::new()).is_empty());
        assert!(!ObservationValue::numeric(0.0).is_empty());
        assert!(!ObservationValue::coded("N").is_empty());
    }

    #[test]
    fn equivalent_treats_empty_as_absent() {
        let blank = ObservationValue::text("");
        assert!(ObservationValue::equivalent(None, Some(&blank)));
        assert!(ObservationValue::equivalent(
            Some(&ObservationValue::Empty),
            Some(&blank)
        ));
        assert!(!ObservationValue::equivalent(
            None,
            Some(&ObservationValue::numeric(1.0))
        ));
    }

    #[test]
    fn medication_validation() {
        assert_eq!(
            MedicationPlan::new("  ").validate(),
            Err(ValueValidationError::MissingDrugName)
        );

        let mut plan = MedicationPlan::new("Amoxicillin");
        plan.dosage = Some(f64::INFINITY);
        assert_eq!(
            plan.validate(),
            Err(ValueValidationError::NonFiniteNumber { field: "dosage" })
        );

        plan.dosage = Some(500.0);
        assert!(plan.validate().is_ok());
    }
}
