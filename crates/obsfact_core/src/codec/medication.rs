//! Medication plan codec.
//!
//! Payload wire shape:
//! `{drugName, dosage?, dosageUnit?, route?, frequency?, instructions?, ...}`.
//! Keys outside this list are kept in `MedicationPlan::extensions` and written
//! back after the known keys, in their original order and with their original
//! number text.

use crate::codec::scalar::mismatch;
use crate::codec::{
    json_kind, parse_payload, render_payload, CodecResult, EncodedValue, EncodingError,
    ValueCodec, ValueSlot,
};
use crate::model::concept::ValueType;
use crate::model::value::{MedicationPlan, ObservationValue, StructuredPayload, ValueValidationError};
use serde_json::{Number, Value};

const DRUG_NAME: &str = "drugName";
const DOSAGE: &str = "dosage";
const DOSAGE_UNIT: &str = "dosageUnit";
const ROUTE: &str = "route";
const FREQUENCY: &str = "frequency";
const INSTRUCTIONS: &str = "instructions";

const KNOWN_FIELDS: [&str; 6] = [DRUG_NAME, DOSAGE, DOSAGE_UNIT, ROUTE, FREQUENCY, INSTRUCTIONS];

#[derive(Debug, Clone, Copy, Default)]
pub struct MedicationCodec;

impl ValueCodec for MedicationCodec {
    fn value_type(&self) -> ValueType {
        ValueType::Medication
    }

    fn validate(&self, value: &ObservationValue) -> Result<(), ValueValidationError> {
        let ObservationValue::Medication(plan) = value else {
            return Err(mismatch(ValueType::Medication, value));
        };
        plan.validate()?;
        if let Some(key) = plan
            .extensions
            .keys()
            .find(|key| KNOWN_FIELDS.contains(&key.as_str()))
        {
            return Err(ValueValidationError::ReservedField(key.clone()));
        }
        Ok(())
    }

    fn encode_value(&self, value: &ObservationValue) -> CodecResult<EncodedValue> {
        let ObservationValue::Medication(plan) = value else {
            return Err(mismatch(ValueType::Medication, value).into());
        };

        let mut payload = StructuredPayload::new();
        payload.insert(DRUG_NAME.to_string(), Value::String(plan.drug_name.clone()));
        if let Some(dosage) = plan.dosage {
            let number = Number::from_f64(dosage)
                .ok_or(ValueValidationError::NonFiniteNumber { field: DOSAGE })?;
            payload.insert(DOSAGE.to_string(), Value::Number(number));
        }
        insert_optional(&mut payload, DOSAGE_UNIT, plan.dosage_unit.as_deref());
        insert_optional(&mut payload, ROUTE, plan.route.as_deref());
        insert_optional(&mut payload, FREQUENCY, plan.frequency.as_deref());
        insert_optional(&mut payload, INSTRUCTIONS, plan.instructions.as_deref());
        for (key, value) in &plan.extensions {
            payload.insert(key.clone(), value.clone());
        }

        Ok(EncodedValue {
            structured_payload: Some(render_payload(payload)?),
            ..EncodedValue::default()
        })
    }

    fn decode_value(&self, encoded: &EncodedValue) -> CodecResult<ObservationValue> {
        encoded.require_slot(&ValueType::Medication, ValueSlot::Payload)?;
        let payload = parse_payload(encoded.structured_payload.as_deref().unwrap_or_default())?;

        let mut plan = MedicationPlan::default();
        let mut drug_name = None;
        for (key, value) in payload {
            match key.as_str() {
                DRUG_NAME => drug_name = optional_string(DRUG_NAME, value)?,
                DOSAGE => plan.dosage = optional_number(value)?,
                DOSAGE_UNIT => plan.dosage_unit = optional_string(DOSAGE_UNIT, value)?,
                ROUTE => plan.route = optional_string(ROUTE, value)?,
                FREQUENCY => plan.frequency = optional_string(FREQUENCY, value)?,
                INSTRUCTIONS => plan.instructions = optional_string(INSTRUCTIONS, value)?,
                _ => {
                    plan.extensions.insert(key, value);
                }
            }
        }

        plan.drug_name = drug_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| EncodingError::MissingField(DRUG_NAME.to_string()))?;
        Ok(ObservationValue::Medication(plan))
    }
}

fn insert_optional(payload: &mut StructuredPayload, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        payload.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn optional_string(field: &str, value: Value) -> Result<Option<String>, EncodingError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Err(EncodingError::InvalidField {
            field: format!("{field} ({})", json_kind(&other)),
            expected: "a string",
        }),
    }
}

fn optional_number(value: Value) -> Result<Option<f64>, EncodingError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => match number.as_f64() {
            Some(dosage) if dosage.is_finite() => Ok(Some(dosage)),
            _ => Err(EncodingError::NonFiniteNumber),
        },
        other => Err(EncodingError::InvalidField {
            field: format!("{DOSAGE} ({})", json_kind(&other)),
            expected: "a number",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::MedicationCodec;
    use crate::codec::{CodecError, EncodedValue, EncodingError, ValueCodec};
    use crate::model::value::{MedicationPlan, ObservationValue, ValueValidationError};
    use serde_json::Value;

    fn payload(text: &str) -> EncodedValue {
        EncodedValue {
            structured_payload: Some(text.to_string()),
            ..EncodedValue::default()
        }
    }

    #[test]
    fn decode_splits_known_fields_and_extensions() {
        let decoded = MedicationCodec
            .decode_value(&payload(
                r#"{"drugName":"Metformin","dosage":500,"route":"oral","prescriberNote":"with meals","refills":2}"#,
            ))
            .unwrap();
        let ObservationValue::Medication(plan) = decoded else {
            panic!("expected medication value");
        };
        assert_eq!(plan.drug_name, "Metformin");
        assert_eq!(plan.dosage, Some(500.0));
        assert_eq!(plan.route.as_deref(), Some("oral"));
        assert_eq!(
            plan.extensions.keys().collect::<Vec<_>>(),
            vec!["prescriberNote", "refills"]
        );
    }

    #[test]
    fn unknown_fields_are_written_back_unchanged() {
        let source = r#"{"drugName":"Metformin","x-trial":{"arm":"B","weights":[1.50,2e3]},"tier":3}"#;
        let decoded = MedicationCodec.decode_value(&payload(source)).unwrap();
        let encoded = MedicationCodec.encode_value(&decoded).unwrap();
        let text = encoded.structured_payload.unwrap();
        assert!(
            text.contains(r#""x-trial":{"arm":"B","weights":[1.50,2e3]},"tier":3"#),
            "extension fields changed: {text}"
        );
    }

    #[test]
    fn decode_requires_drug_name() {
        let err = MedicationCodec
            .decode_value(&payload(r#"{"dosage":5}"#))
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::Encoding(EncodingError::MissingField("drugName".to_string()))
        );
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        let err = MedicationCodec
            .decode_value(&payload(r#"["Metformin"]"#))
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::Encoding(EncodingError::InvalidPayload(_))
        ));
    }

    #[test]
    fn validate_rejects_extension_shadowing_known_field() {
        let mut plan = MedicationPlan::new("Metformin");
        plan.extensions
            .insert("route".to_string(), Value::String("iv".to_string()));
        assert_eq!(
            MedicationCodec.validate(&ObservationValue::Medication(plan)),
            Err(ValueValidationError::ReservedField("route".to_string()))
        );
    }
}
