//! Value codecs and the value-type registry.
//!
//! # Responsibility
//! - Map typed observation values onto the shared fact row shape and back.
//! - Keep one codec per value type, registered independently of callers.
//!
//! # Invariants
//! - `decode(encode(v)) == v` for every valid value of every registered type.
//! - Encoded rows populate exactly one of numeric/text/payload slots.
//! - `unit_code` only appears on numeric rows.
//! - Unknown structured payload keys survive decode/encode unchanged.

pub mod medication;
pub mod scalar;
pub mod structured;

use crate::model::concept::ValueType;
use crate::model::fact::{FactKey, FactRow, ObservationFact};
use crate::model::value::{ObservationValue, StructuredPayload, ValueValidationError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub use medication::MedicationCodec;
pub use scalar::{CodedCodec, NumericCodec, TextCodec};
pub use structured::StructuredCodec;

pub type CodecResult<T> = Result<T, CodecError>;

/// Row-level inconsistencies between stored slots and the declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// No codec is registered for the row's value type.
    UnsupportedValueType(ValueType),
    /// Populated slots do not match what the value type requires.
    SlotMismatch {
        value_type: ValueType,
        expected: ValueSlot,
        found: Vec<ValueSlot>,
    },
    /// `unit_code` set on a non-numeric row.
    UnexpectedUnit(ValueType),
    NonFiniteNumber,
    /// Payload text is not a JSON object.
    InvalidPayload(String),
    MissingField(String),
    InvalidField {
        field: String,
        expected: &'static str,
    },
}

impl Display for EncodingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedValueType(value_type) => {
                write!(f, "no codec registered for value type `{value_type}`")
            }
            Self::SlotMismatch {
                value_type,
                expected,
                found,
            } => {
                let found = found
                    .iter()
                    .map(|slot| slot.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(
                    f,
                    "{value_type} row must populate only {} (found: [{found}])",
                    expected.as_str()
                )
            }
            Self::UnexpectedUnit(value_type) => {
                write!(f, "unit_code is only valid on numeric rows, not {value_type}")
            }
            Self::NonFiniteNumber => write!(f, "numeric_value is not finite"),
            Self::InvalidPayload(message) => write!(f, "invalid structured payload: {message}"),
            Self::MissingField(field) => write!(f, "structured payload is missing `{field}`"),
            Self::InvalidField { field, expected } => {
                write!(f, "payload field `{field}` must be {expected}")
            }
        }
    }
}

impl Error for EncodingError {}

/// Codec failure: either the value or the stored row is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Validation(ValueValidationError),
    Encoding(EncodingError),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Encoding(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Encoding(err) => Some(err),
        }
    }
}

impl From<ValueValidationError> for CodecError {
    fn from(value: ValueValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<EncodingError> for CodecError {
    fn from(value: EncodingError) -> Self {
        Self::Encoding(value)
    }
}

/// Primary value slot of a fact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSlot {
    Numeric,
    Text,
    Payload,
}

impl ValueSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric_value",
            Self::Text => "text_value",
            Self::Payload => "structured_payload",
        }
    }
}

/// Value slots of a fact row, without identity or metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedValue {
    pub numeric_value: Option<f64>,
    pub text_value: Option<String>,
    pub unit_code: Option<String>,
    pub structured_payload: Option<String>,
}

impl EncodedValue {
    pub fn from_row(row: &FactRow) -> Self {
        Self {
            numeric_value: row.numeric_value,
            text_value: row.text_value.clone(),
            unit_code: row.unit_code.clone(),
            structured_payload: row.structured_payload.clone(),
        }
    }

    /// Returns populated primary slots in declaration order.
    pub fn populated_slots(&self) -> Vec<ValueSlot> {
        let mut slots = Vec::with_capacity(1);
        if self.numeric_value.is_some() {
            slots.push(ValueSlot::Numeric);
        }
        if self.text_value.is_some() {
            slots.push(ValueSlot::Text);
        }
        if self.structured_payload.is_some() {
            slots.push(ValueSlot::Payload);
        }
        slots
    }

    /// Fails unless `expected` is the one and only populated primary slot.
    pub fn require_slot(
        &self,
        value_type: &ValueType,
        expected: ValueSlot,
    ) -> Result<(), EncodingError> {
        let found = self.populated_slots();
        if found.as_slice() == [expected] {
            return Ok(());
        }
        Err(EncodingError::SlotMismatch {
            value_type: value_type.clone(),
            expected,
            found,
        })
    }
}

/// Codec contract for one value type.
///
/// Codecs only see value slots; identity and metadata are handled by the
/// registry so a new codec cannot break row identity.
pub trait ValueCodec: Send + Sync {
    fn value_type(&self) -> ValueType;
    /// Checks the value against this type's schema.
    fn validate(&self, value: &ObservationValue) -> Result<(), ValueValidationError>;
    /// Encodes an already validated, non-empty value.
    fn encode_value(&self, value: &ObservationValue) -> CodecResult<EncodedValue>;
    fn decode_value(&self, encoded: &EncodedValue) -> CodecResult<ObservationValue>;
}

/// Codec registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecRegistryError {
    InvalidValueType(String),
    DuplicateValueType(String),
}

impl Display for CodecRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValueType(value) => write!(f, "value type name is invalid: {value}"),
            Self::DuplicateValueType(value) => {
                write!(f, "value type already registered: {value}")
            }
        }
    }
}

impl Error for CodecRegistryError {}

/// Runtime registry of value codecs keyed by value type wire name.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, Arc<dyn ValueCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with numeric, text, coded and medication codecs.
    pub fn with_builtin_codecs() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn ValueCodec>; 4] = [
            Arc::new(NumericCodec),
            Arc::new(TextCodec),
            Arc::new(CodedCodec),
            Arc::new(MedicationCodec),
        ];
        for codec in builtins {
            let value_type = codec.value_type().as_str().to_string();
            registry.codecs.insert(value_type, codec);
        }
        registry
    }

    /// Registers one codec.
    pub fn register(&mut self, codec: Arc<dyn ValueCodec>) -> Result<(), CodecRegistryError> {
        let value_type = codec.value_type();
        if !value_type.is_valid_name() {
            return Err(CodecRegistryError::InvalidValueType(
                value_type.as_str().to_string(),
            ));
        }
        let name = value_type.as_str().to_string();
        if self.codecs.contains_key(name.as_str()) {
            return Err(CodecRegistryError::DuplicateValueType(name));
        }

        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Returns registered value types sorted by wire name.
    pub fn value_types(&self) -> Vec<ValueType> {
        self.codecs.keys().map(|name| ValueType::parse(name)).collect()
    }

    pub fn get(&self, value_type: &ValueType) -> Option<Arc<dyn ValueCodec>> {
        self.codecs.get(value_type.as_str()).cloned()
    }

    /// Validates a value for `value_type`. Empty values are always accepted.
    pub fn validate(&self, value_type: &ValueType, value: &ObservationValue) -> CodecResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        let codec = self.require(value_type)?;
        codec.validate(value)?;
        Ok(())
    }

    /// Encodes a decoded fact into its persisted row.
    ///
    /// # Errors
    /// - `Validation(EmptyValue)` for empty values; empties are deleted, not stored.
    /// - `Validation(..)` when the value violates its type's schema.
    /// - `Encoding(..)` when no codec exists or the codec breaks the row shape.
    pub fn encode(&self, fact: &ObservationFact) -> CodecResult<FactRow> {
        if fact.value.is_empty() {
            return Err(ValueValidationError::EmptyValue.into());
        }
        let codec = self.require(&fact.value_type)?;
        codec.validate(&fact.value)?;
        let encoded = codec.encode_value(&fact.value)?;
        check_row_shape(&fact.value_type, &encoded)?;

        let FactKey {
            patient_id,
            visit_id,
            concept_code,
        } = fact.key.clone();
        Ok(FactRow {
            patient_id,
            visit_id,
            concept_code,
            value_type: fact.value_type.clone(),
            numeric_value: encoded.numeric_value,
            text_value: encoded.text_value,
            unit_code: encoded.unit_code,
            structured_payload: encoded.structured_payload,
            recorded_at: fact.recorded_at,
            category: fact.category.clone(),
            source_system: fact.source_system.clone(),
        })
    }

    /// Decodes a persisted row.
    ///
    /// # Errors
    /// - `Encoding(..)` when slots are inconsistent with the row's value type.
    pub fn decode(&self, row: &FactRow) -> CodecResult<ObservationFact> {
        let codec = self.require(&row.value_type)?;
        let encoded = EncodedValue::from_row(row);
        check_row_shape(&row.value_type, &encoded)?;
        let value = codec.decode_value(&encoded)?;

        Ok(ObservationFact {
            key: row.key(),
            value_type: row.value_type.clone(),
            value,
            recorded_at: row.recorded_at,
            category: row.category.clone(),
            source_system: row.source_system.clone(),
        })
    }

    fn require(&self, value_type: &ValueType) -> Result<Arc<dyn ValueCodec>, EncodingError> {
        self.get(value_type)
            .ok_or_else(|| EncodingError::UnsupportedValueType(value_type.clone()))
    }
}

fn check_row_shape(value_type: &ValueType, encoded: &EncodedValue) -> Result<(), EncodingError> {
    let found = encoded.populated_slots();
    if found.len() != 1 {
        return Err(EncodingError::SlotMismatch {
            value_type: value_type.clone(),
            expected: default_slot(value_type),
            found,
        });
    }
    if encoded.unit_code.is_some() && *value_type != ValueType::Numeric {
        return Err(EncodingError::UnexpectedUnit(value_type.clone()));
    }
    Ok(())
}

fn default_slot(value_type: &ValueType) -> ValueSlot {
    match value_type {
        ValueType::Numeric => ValueSlot::Numeric,
        ValueType::Text | ValueType::Coded => ValueSlot::Text,
        ValueType::Medication | ValueType::Custom(_) => ValueSlot::Payload,
    }
}

/// Parses payload text into an ordered JSON object.
pub(crate) fn parse_payload(text: &str) -> Result<StructuredPayload, EncodingError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(EncodingError::InvalidPayload(format!(
            "expected JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(EncodingError::InvalidPayload(err.to_string())),
    }
}

/// Serializes an ordered JSON object to payload text.
pub(crate) fn render_payload(payload: StructuredPayload) -> Result<String, EncodingError> {
    serde_json::to_string(&Value::Object(payload))
        .map_err(|err| EncodingError::InvalidPayload(err.to_string()))
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
