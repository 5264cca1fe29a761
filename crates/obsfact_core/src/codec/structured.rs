//! Generic payload codec for runtime-registered value types.

use crate::codec::scalar::mismatch;
use crate::codec::{
    parse_payload, render_payload, CodecResult, EncodedValue, EncodingError, ValueCodec,
    ValueSlot,
};
use crate::model::concept::ValueType;
use crate::model::value::{ObservationValue, StructuredPayload, ValueValidationError};
use serde_json::Value;

/// Stores `ObservationValue::Structured` payloads as JSON objects.
///
/// Only the presence of `required_fields` is checked; every other key is
/// opaque and round-trips untouched.
#[derive(Debug, Clone)]
pub struct StructuredCodec {
    value_type: ValueType,
    required_fields: Vec<String>,
}

impl StructuredCodec {
    pub fn new<I, S>(value_type: ValueType, required_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            value_type,
            required_fields: required_fields.into_iter().map(Into::into).collect(),
        }
    }

    fn missing_field<'a>(&'a self, payload: &StructuredPayload) -> Option<&'a str> {
        self.required_fields
            .iter()
            .find(|field| matches!(payload.get(field.as_str()), None | Some(Value::Null)))
            .map(String::as_str)
    }
}

impl ValueCodec for StructuredCodec {
    fn value_type(&self) -> ValueType {
        self.value_type.clone()
    }

    fn validate(&self, value: &ObservationValue) -> Result<(), ValueValidationError> {
        let ObservationValue::Structured(payload) = value else {
            return Err(mismatch(self.value_type.clone(), value));
        };
        match self.missing_field(payload) {
            Some(field) => Err(ValueValidationError::MissingRequiredField(field.to_string())),
            None => Ok(()),
        }
    }

    fn encode_value(&self, value: &ObservationValue) -> CodecResult<EncodedValue> {
        let ObservationValue::Structured(payload) = value else {
            return Err(mismatch(self.value_type.clone(), value).into());
        };
        Ok(EncodedValue {
            structured_payload: Some(render_payload(payload.clone())?),
            ..EncodedValue::default()
        })
    }

    fn decode_value(&self, encoded: &EncodedValue) -> CodecResult<ObservationValue> {
        encoded.require_slot(&self.value_type, ValueSlot::Payload)?;
        let payload = parse_payload(encoded.structured_payload.as_deref().unwrap_or_default())?;
        if let Some(field) = self.missing_field(&payload) {
            return Err(EncodingError::MissingField(field.to_string()).into());
        }
        Ok(ObservationValue::Structured(payload))
    }
}
