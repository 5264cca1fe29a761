//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `obsfact_core` linkage.
//! - Run one in-memory edit/save cycle with deterministic output.

use obsfact_core::db::open_db_in_memory;
use obsfact_core::{
    Concept, ObservationService, ObservationValue, SqliteConceptCatalog, SqliteFactRepository,
    ValueType,
};
use std::error::Error;
use uuid::Uuid;

fn main() -> Result<(), Box<dyn Error>> {
    println!("obsfact_core ping={}", obsfact_core::ping());
    println!("obsfact_core version={}", obsfact_core::core_version());

    let conn = open_db_in_memory()?;
    let catalog = SqliteConceptCatalog::new(&conn);
    catalog.upsert_concept(
        &Concept::new("WEIGHT", "Body weight", ValueType::Numeric, "vitals")
            .with_default_unit("kg"),
    )?;
    catalog.upsert_concept(&Concept::new("NOTE", "Visit note", ValueType::Text, "vitals"))?;

    let service = ObservationService::new(SqliteFactRepository::new(&conn));
    let visit = service.create_visit(Uuid::new_v4(), 0, Some("smoke".to_string()))?;
    let mut working_set = service.open_visit(visit.visit_id)?;
    working_set.track_category(&catalog, "vitals")?;
    working_set.set_value("WEIGHT", ObservationValue::numeric(70.0))?;

    let report = service.save(&mut working_set);
    let stats = working_set.overall_stats();
    println!(
        "obsfact_core smoke writes={} unsaved={} filled={}/{}",
        report.write_count(),
        working_set.unsaved_count(),
        stats.filled,
        stats.total
    );
    Ok(())
}
