use obsfact_core::db::open_db_in_memory;
use obsfact_core::{
    CodecError, CodecRegistry, EncodingError, FactKey, FactRepository, FactRow, MedicationPlan,
    ObservationFact, ObservationValue, SqliteFactRepository, StructuredCodec,
    ValueValidationError, ValueType,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

fn registry() -> CodecRegistry {
    let mut codecs = CodecRegistry::with_builtin_codecs();
    codecs
        .register(Arc::new(StructuredCodec::new(
            ValueType::Custom("blood_pressure".to_string()),
            ["systolic", "diastolic"],
        )))
        .unwrap();
    codecs
}

fn fact(concept_code: &str, value_type: ValueType, value: ObservationValue) -> ObservationFact {
    ObservationFact {
        key: FactKey::new(Uuid::new_v4(), Uuid::new_v4(), concept_code),
        value_type,
        value,
        recorded_at: 1_700_000_000_000,
        category: "vitals".to_string(),
        source_system: "obsfact".to_string(),
    }
}

fn payload(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn every_value_type_survives_sqlite_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteFactRepository::new(&conn);
    let codecs = registry();

    let mut plan = MedicationPlan::new("Metformin");
    plan.dosage = Some(500.0);
    plan.dosage_unit = Some("mg".to_string());
    plan.frequency = Some("BID".to_string());
    plan.extensions = payload(json!({"prescriber": "dr-7", "tags": ["renal", "oral"]}));

    let facts = [
        fact(
            "WEIGHT",
            ValueType::Numeric,
            ObservationValue::numeric_with_unit(72.5, "kg"),
        ),
        fact("PULSE", ValueType::Numeric, ObservationValue::numeric(60.0)),
        fact("NOTE", ValueType::Text, ObservationValue::text(" free text\n")),
        fact("SMOKER", ValueType::Coded, ObservationValue::coded("LA15920-4")),
        fact("MED", ValueType::Medication, ObservationValue::Medication(plan)),
        fact(
            "BP",
            ValueType::Custom("blood_pressure".to_string()),
            ObservationValue::Structured(payload(
                json!({"systolic": 120, "diastolic": 80, "position": "sitting"}),
            )),
        ),
    ];

    for original in &facts {
        repo.upsert_fact(&codecs.encode(original).unwrap()).unwrap();
        let rows = repo
            .list_visit_facts(original.key.patient_id, original.key.visit_id)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(&codecs.decode(&rows[0]).unwrap(), original);
    }
}

#[test]
fn unknown_payload_keys_keep_order_and_number_text() {
    let codecs = registry();
    let text = r#"{"drugName":"Aspirin","zeta":1.50,"alpha":{"nested":[1e3,0.10]},"dosage":100}"#;
    let row = FactRow {
        patient_id: Uuid::new_v4(),
        visit_id: Uuid::new_v4(),
        concept_code: "MED".to_string(),
        value_type: ValueType::Medication,
        numeric_value: None,
        text_value: None,
        unit_code: None,
        structured_payload: Some(text.to_string()),
        recorded_at: 1,
        category: "medication".to_string(),
        source_system: "import".to_string(),
    };

    let decoded = codecs.decode(&row).unwrap();
    let ObservationValue::Medication(plan) = &decoded.value else {
        panic!("expected medication, got {:?}", decoded.value);
    };
    assert_eq!(plan.drug_name, "Aspirin");
    assert_eq!(plan.dosage, Some(100.0));
    let keys: Vec<&str> = plan.extensions.keys().map(String::as_str).collect();
    assert_eq!(keys, ["zeta", "alpha"]);

    let encoded = codecs.encode(&decoded).unwrap();
    let rewritten = encoded.structured_payload.unwrap();
    assert!(rewritten.contains(r#""zeta":1.50"#), "{rewritten}");
    assert!(rewritten.contains(r#""alpha":{"nested":[1e3,0.10]}"#), "{rewritten}");
}

#[test]
fn schema_violations_are_validation_errors() {
    let codecs = registry();

    let err = codecs
        .encode(&fact(
            "MED",
            ValueType::Medication,
            ObservationValue::Medication(MedicationPlan::new("  ")),
        ))
        .unwrap_err();
    assert_eq!(
        err,
        CodecError::Validation(ValueValidationError::MissingDrugName)
    );

    let err = codecs
        .encode(&fact(
            "WEIGHT",
            ValueType::Numeric,
            ObservationValue::numeric(f64::INFINITY),
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::Validation(ValueValidationError::NonFiniteNumber { .. })
    ));

    let err = codecs
        .encode(&fact("NOTE", ValueType::Text, ObservationValue::Empty))
        .unwrap_err();
    assert_eq!(err, CodecError::Validation(ValueValidationError::EmptyValue));

    let err = codecs
        .encode(&fact(
            "BP",
            ValueType::Custom("blood_pressure".to_string()),
            ObservationValue::Structured(payload(json!({"systolic": 120}))),
        ))
        .unwrap_err();
    assert_eq!(
        err,
        CodecError::Validation(ValueValidationError::MissingRequiredField(
            "diastolic".to_string()
        ))
    );
}

#[test]
fn inconsistent_rows_are_encoding_errors() {
    let codecs = registry();
    let base = codecs
        .encode(&fact(
            "WEIGHT",
            ValueType::Numeric,
            ObservationValue::numeric(70.0),
        ))
        .unwrap();

    let payload_only = FactRow {
        numeric_value: None,
        structured_payload: Some("{}".to_string()),
        ..base.clone()
    };
    assert!(matches!(
        codecs.decode(&payload_only),
        Err(CodecError::Encoding(EncodingError::SlotMismatch { .. }))
    ));

    let unknown_type = FactRow {
        value_type: ValueType::Custom("spirometry".to_string()),
        ..base.clone()
    };
    assert!(matches!(
        codecs.decode(&unknown_type),
        Err(CodecError::Encoding(EncodingError::UnsupportedValueType(_)))
    ));

    let array_payload = FactRow {
        value_type: ValueType::Medication,
        numeric_value: None,
        structured_payload: Some("[1, 2]".to_string()),
        ..base
    };
    assert!(matches!(
        codecs.decode(&array_payload),
        Err(CodecError::Encoding(EncodingError::InvalidPayload(_)))
    ));
}
