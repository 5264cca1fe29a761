//! Concept catalog contract and SQLite implementation.
//!
//! # Invariants
//! - Category listings are ordered pinned first, then `sort_order`, then code.
//! - `get_concept` reports a missing code as `ConceptNotFound`, never `Ok(None)`.

use crate::model::concept::{is_valid_concept_code, Concept, ValueType};
use crate::repo::{bool_to_int, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const CONCEPT_SELECT_SQL: &str = "SELECT
    code,
    display_name,
    value_type,
    default_unit,
    category,
    coding_reference,
    pinned,
    sort_order
FROM concepts";

/// Read-only lookup of observation concepts.
pub trait ConceptCatalog {
    fn list_concepts_by_category(&self, category: &str) -> RepoResult<Vec<Concept>>;
    fn get_concept(&self, code: &str) -> RepoResult<Concept>;
    /// Returns distinct category names sorted ascending.
    fn list_categories(&self) -> RepoResult<Vec<String>>;
}

impl<T: ConceptCatalog + ?Sized> ConceptCatalog for &T {
    fn list_concepts_by_category(&self, category: &str) -> RepoResult<Vec<Concept>> {
        (**self).list_concepts_by_category(category)
    }

    fn get_concept(&self, code: &str) -> RepoResult<Concept> {
        (**self).get_concept(code)
    }

    fn list_categories(&self) -> RepoResult<Vec<String>> {
        (**self).list_categories()
    }
}

/// SQLite-backed concept catalog.
pub struct SqliteConceptCatalog<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteConceptCatalog<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or replaces a concept definition. Used to seed the catalog.
    pub fn upsert_concept(&self, concept: &Concept) -> RepoResult<()> {
        if !is_valid_concept_code(&concept.code) {
            return Err(RepoError::InvalidKey(format!(
                "concept code `{}`",
                concept.code
            )));
        }
        if concept.category.trim().is_empty() {
            return Err(RepoError::InvalidKey(format!(
                "concept `{}` has a blank category",
                concept.code
            )));
        }

        self.conn.execute(
            "INSERT INTO concepts (
                code,
                display_name,
                value_type,
                default_unit,
                category,
                coding_reference,
                pinned,
                sort_order
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (code) DO UPDATE SET
                display_name = excluded.display_name,
                value_type = excluded.value_type,
                default_unit = excluded.default_unit,
                category = excluded.category,
                coding_reference = excluded.coding_reference,
                pinned = excluded.pinned,
                sort_order = excluded.sort_order;",
            params![
                concept.code.as_str(),
                concept.display_name.as_str(),
                concept.value_type.as_str(),
                concept.default_unit.as_deref(),
                concept.category.as_str(),
                concept.coding_reference.as_deref(),
                bool_to_int(concept.pinned),
                concept.sort_order,
            ],
        )?;
        Ok(())
    }
}

impl ConceptCatalog for SqliteConceptCatalog<'_> {
    fn list_concepts_by_category(&self, category: &str) -> RepoResult<Vec<Concept>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONCEPT_SELECT_SQL}
             WHERE category = ?1
             ORDER BY pinned DESC, sort_order ASC, code ASC;"
        ))?;
        let mut rows = stmt.query([category])?;
        let mut concepts = Vec::new();
        while let Some(row) = rows.next()? {
            concepts.push(parse_concept_row(row)?);
        }
        Ok(concepts)
    }

    fn get_concept(&self, code: &str) -> RepoResult<Concept> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONCEPT_SELECT_SQL} WHERE code = ?1;"))?;
        let mut rows = stmt.query([code])?;
        match rows.next()? {
            Some(row) => parse_concept_row(row),
            None => Err(RepoError::ConceptNotFound(code.to_string())),
        }
    }

    fn list_categories(&self) -> RepoResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT category FROM concepts ORDER BY category ASC;")?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }
}

fn parse_concept_row(row: &Row<'_>) -> RepoResult<Concept> {
    let value_type: String = row.get("value_type")?;
    let pinned = match row.get::<_, i64>("pinned")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid pinned value `{other}` in concepts.pinned"
            )));
        }
    };

    Ok(Concept {
        code: row.get("code")?,
        display_name: row.get("display_name")?,
        value_type: ValueType::parse(&value_type),
        default_unit: row.get("default_unit")?,
        category: row.get("category")?,
        coding_reference: row.get("coding_reference")?,
        pinned,
        sort_order: row.get("sort_order")?,
    })
}
