//! Concept definitions and value-type tags.
//!
//! # Responsibility
//! - Describe what is being observed (`Concept`) and how its value is typed.
//! - Keep the value-type enumeration open for runtime-registered codecs.
//!
//! # Invariants
//! - Concept codes match `[A-Za-z0-9_.:-]{1,64}`.
//! - `ValueType` wire names are lowercase snake_case and stable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

static CONCEPT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]{1,64}$").expect("valid concept code regex"));
static VALUE_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,31}$").expect("valid value type regex"));

/// Tag describing which codec owns a fact's value slots.
///
/// Built-in variants cover the core value shapes; `Custom` carries the wire
/// name of any codec registered at runtime. Adding a variant never changes
/// the persisted row shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValueType {
    /// Finite number with optional unit.
    Numeric,
    /// Free text.
    Text,
    /// Code from an external terminology.
    Coded,
    /// Structured medication plan payload.
    Medication,
    /// Runtime-registered type, stored by wire name.
    Custom(String),
}

impl ValueType {
    /// Returns the stable wire name persisted in `observation_facts.value_type`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::Coded => "coded",
            Self::Medication => "medication",
            Self::Custom(name) => name.as_str(),
        }
    }

    /// Parses a wire name. Unknown names map to `Custom`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "numeric" => Self::Numeric,
            "text" => Self::Text,
            "coded" => Self::Coded,
            "medication" => Self::Medication,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Returns whether the wire name is acceptable for registration.
    pub fn is_valid_name(&self) -> bool {
        VALUE_TYPE_RE.is_match(self.as_str())
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ValueType {
    fn from(value: String) -> Self {
        Self::parse(value.as_str())
    }
}

impl From<ValueType> for String {
    fn from(value: ValueType) -> Self {
        value.as_str().to_string()
    }
}

/// Coded definition of an observable quantity or statement.
///
/// Owned by the concept catalog; the core never mutates concepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub code: String,
    pub display_name: String,
    pub value_type: ValueType,
    /// Unit applied to numeric values entered without one.
    pub default_unit: Option<String>,
    pub category: String,
    /// Opaque reference into an external coding standard (e.g. `LOINC:29463-7`).
    pub coding_reference: Option<String>,
    /// Pinned concepts list before unpinned ones within a category.
    pub pinned: bool,
    pub sort_order: i64,
}

impl Concept {
    /// Creates an unpinned concept with no unit or coding reference.
    pub fn new(
        code: impl Into<String>,
        display_name: impl Into<String>,
        value_type: ValueType,
        category: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            display_name: display_name.into(),
            value_type,
            default_unit: None,
            category: category.into(),
            coding_reference: None,
            pinned: false,
            sort_order: 0,
        }
    }

    pub fn with_default_unit(mut self, unit: impl Into<String>) -> Self {
        self.default_unit = Some(unit.into());
        self
    }
}

/// Returns whether `code` is a syntactically valid concept code.
pub fn is_valid_concept_code(code: &str) -> bool {
    CONCEPT_CODE_RE.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::{is_valid_concept_code, Concept, ValueType};
    use serde_json::Value;

    #[test]
    fn value_type_parses_builtin_and_custom_names() {
        assert_eq!(ValueType::parse(" Numeric "), ValueType::Numeric);
        assert_eq!(ValueType::parse("medication"), ValueType::Medication);
        assert_eq!(
            ValueType::parse("blood_pressure"),
            ValueType::Custom("blood_pressure".to_string())
        );
        assert_eq!(ValueType::Custom("score".to_string()).as_str(), "score");
    }

    #[test]
    fn value_type_name_validation_rejects_spaces() {
        assert!(ValueType::Custom("blood_pressure".to_string()).is_valid_name());
        assert!(!ValueType::Custom("blood pressure".to_string()).is_valid_name());
        assert!(!ValueType::Custom(String::new()).is_valid_name());
    }

    #[test]
    fn concept_code_validation() {
        assert!(is_valid_concept_code("WEIGHT"));
        assert!(is_valid_concept_code("LOINC:29463-7"));
        assert!(!is_valid_concept_code(""));
        assert!(!is_valid_concept_code("body weight"));
    }

    #[test]
    fn concept_serializes_with_camel_case_keys() {
        let concept = Concept::new("WEIGHT", "Body weight", ValueType::Numeric, "vitals")
            .with_default_unit("kg");

        let text = serde_json::to_string(&concept).unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["displayName"], Value::String("Body weight".to_string()));
        assert_eq!(json["valueType"], Value::String("numeric".to_string()));
        assert_eq!(json["defaultUnit"], Value::String("kg".to_string()));
        assert_eq!(json["codingReference"], Value::Null);
        assert!(json.get("sortOrder").is_some());

        let parsed: Concept = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, concept);
    }

    #[test]
    fn unknown_value_type_name_deserializes_as_custom() {
        let parsed: ValueType = serde_json::from_str(r#""Spirometry""#).unwrap();
        assert_eq!(parsed, ValueType::Custom("spirometry".to_string()));
    }
}
