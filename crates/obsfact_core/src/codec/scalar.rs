//! Codecs for scalar value types: numeric, text and coded.

use crate::codec::{CodecResult, EncodedValue, EncodingError, ValueCodec, ValueSlot};
use crate::model::concept::ValueType;
use crate::model::value::{ObservationValue, ValueValidationError};

/// Finite number with optional unit in `numeric_value` + `unit_code`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericCodec;

impl ValueCodec for NumericCodec {
    fn value_type(&self) -> ValueType {
        ValueType::Numeric
    }

    fn validate(&self, value: &ObservationValue) -> Result<(), ValueValidationError> {
        match value {
            ObservationValue::Numeric { value, unit } => {
                if !value.is_finite() {
                    return Err(ValueValidationError::NonFiniteNumber { field: "value" });
                }
                if let Some(unit) = unit {
                    if !is_valid_unit(unit) {
                        return Err(ValueValidationError::InvalidUnit(unit.clone()));
                    }
                }
                Ok(())
            }
            other => Err(mismatch(ValueType::Numeric, other)),
        }
    }

    fn encode_value(&self, value: &ObservationValue) -> CodecResult<EncodedValue> {
        match value {
            ObservationValue::Numeric { value, unit } => Ok(EncodedValue {
                numeric_value: Some(*value),
                unit_code: unit.clone(),
                ..EncodedValue::default()
            }),
            other => Err(mismatch(ValueType::Numeric, other).into()),
        }
    }

    fn decode_value(&self, encoded: &EncodedValue) -> CodecResult<ObservationValue> {
        encoded.require_slot(&ValueType::Numeric, ValueSlot::Numeric)?;
        let value = encoded.numeric_value.ok_or(EncodingError::NonFiniteNumber)?;
        if !value.is_finite() {
            return Err(EncodingError::NonFiniteNumber.into());
        }
        if let Some(unit) = encoded.unit_code.as_deref() {
            if !is_valid_unit(unit) {
                return Err(EncodingError::InvalidField {
                    field: "unit_code".to_string(),
                    expected: "a non-blank unit code",
                }
                .into());
            }
        }

        Ok(ObservationValue::Numeric {
            value,
            unit: encoded.unit_code.clone(),
        })
    }
}

/// Free text in `text_value`, stored verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl ValueCodec for TextCodec {
    fn value_type(&self) -> ValueType {
        ValueType::Text
    }

    fn validate(&self, value: &ObservationValue) -> Result<(), ValueValidationError> {
        match value {
            ObservationValue::Text(_) => Ok(()),
            other => Err(mismatch(ValueType::Text, other)),
        }
    }

    fn encode_value(&self, value: &ObservationValue) -> CodecResult<EncodedValue> {
        match value {
            ObservationValue::Text(text) => Ok(EncodedValue {
                text_value: Some(text.clone()),
                ..EncodedValue::default()
            }),
            other => Err(mismatch(ValueType::Text, other).into()),
        }
    }

    fn decode_value(&self, encoded: &EncodedValue) -> CodecResult<ObservationValue> {
        encoded.require_slot(&ValueType::Text, ValueSlot::Text)?;
        Ok(ObservationValue::Text(
            encoded.text_value.clone().unwrap_or_default(),
        ))
    }
}

/// Terminology code in `text_value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodedCodec;

impl ValueCodec for CodedCodec {
    fn value_type(&self) -> ValueType {
        ValueType::Coded
    }

    fn validate(&self, value: &ObservationValue) -> Result<(), ValueValidationError> {
        match value {
            ObservationValue::Coded(code) if code.trim() != code => {
                Err(ValueValidationError::InvalidCode(code.clone()))
            }
            ObservationValue::Coded(_) => Ok(()),
            other => Err(mismatch(ValueType::Coded, other)),
        }
    }

    fn encode_value(&self, value: &ObservationValue) -> CodecResult<EncodedValue> {
        match value {
            ObservationValue::Coded(code) => Ok(EncodedValue {
                text_value: Some(code.clone()),
                ..EncodedValue::default()
            }),
            other => Err(mismatch(ValueType::Coded, other).into()),
        }
    }

    fn decode_value(&self, encoded: &EncodedValue) -> CodecResult<ObservationValue> {
        encoded.require_slot(&ValueType::Coded, ValueSlot::Text)?;
        let code = encoded.text_value.clone().unwrap_or_default();
        if code.is_empty() || code.trim() != code {
            return Err(EncodingError::InvalidField {
                field: "text_value".to_string(),
                expected: "a non-blank code without surrounding whitespace",
            }
            .into());
        }
        Ok(ObservationValue::Coded(code))
    }
}

fn is_valid_unit(unit: &str) -> bool {
    !unit.is_empty() && unit.trim() == unit
}

pub(crate) fn mismatch(expected: ValueType, found: &ObservationValue) -> ValueValidationError {
    ValueValidationError::TypeMismatch {
        expected: expected.as_str().to_string(),
        found: found.kind_name(),
    }
}
