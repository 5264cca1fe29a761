use obsfact_core::db::open_db_in_memory;
use obsfact_core::{Concept, ConceptCatalog, RepoError, SqliteConceptCatalog, ValueType};

fn concept(code: &str, category: &str, pinned: bool, sort_order: i64) -> Concept {
    let mut concept = Concept::new(code, code.to_lowercase(), ValueType::Numeric, category);
    concept.pinned = pinned;
    concept.sort_order = sort_order;
    concept
}

#[test]
fn category_listing_orders_pinned_then_sort_order_then_code() {
    let conn = open_db_in_memory().unwrap();
    let catalog = SqliteConceptCatalog::new(&conn);
    for item in [
        concept("PULSE", "vitals", false, 1),
        concept("HEIGHT", "vitals", false, 1),
        concept("WEIGHT", "vitals", true, 9),
        concept("TEMP", "vitals", false, 0),
        concept("HBA1C", "labs", false, 0),
    ] {
        catalog.upsert_concept(&item).unwrap();
    }

    let codes: Vec<String> = catalog
        .list_concepts_by_category("vitals")
        .unwrap()
        .into_iter()
        .map(|concept| concept.code)
        .collect();
    assert_eq!(codes, ["WEIGHT", "TEMP", "HEIGHT", "PULSE"]);
    assert_eq!(catalog.list_categories().unwrap(), ["labs", "vitals"]);
    assert!(catalog.list_concepts_by_category("imaging").unwrap().is_empty());
}

#[test]
fn get_concept_roundtrips_and_reports_missing_code() {
    let conn = open_db_in_memory().unwrap();
    let catalog = SqliteConceptCatalog::new(&conn);
    let mut weight = Concept::new("WEIGHT", "Body weight", ValueType::Numeric, "vitals")
        .with_default_unit("kg");
    weight.coding_reference = Some("LOINC:29463-7".to_string());
    catalog.upsert_concept(&weight).unwrap();

    assert_eq!(catalog.get_concept("WEIGHT").unwrap(), weight);
    assert!(matches!(
        catalog.get_concept("PULSE"),
        Err(RepoError::ConceptNotFound(code)) if code == "PULSE"
    ));
}

#[test]
fn upsert_replaces_definition_and_keeps_custom_value_types() {
    let conn = open_db_in_memory().unwrap();
    let catalog = SqliteConceptCatalog::new(&conn);
    catalog
        .upsert_concept(&Concept::new("BP", "Blood pressure", ValueType::Text, "vitals"))
        .unwrap();
    catalog
        .upsert_concept(&Concept::new(
            "BP",
            "Blood pressure",
            ValueType::Custom("blood_pressure".to_string()),
            "vitals",
        ))
        .unwrap();

    assert_eq!(
        catalog.get_concept("BP").unwrap().value_type,
        ValueType::Custom("blood_pressure".to_string())
    );
}

#[test]
fn upsert_rejects_invalid_code_and_blank_category() {
    let conn = open_db_in_memory().unwrap();
    let catalog = SqliteConceptCatalog::new(&conn);

    let err = catalog
        .upsert_concept(&Concept::new("bad code", "x", ValueType::Text, "vitals"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidKey(_)));

    let err = catalog
        .upsert_concept(&Concept::new("NOTE", "x", ValueType::Text, "  "))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidKey(_)));
}
