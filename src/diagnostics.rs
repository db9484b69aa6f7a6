//! Diagnostics
//!
//! Collects compilation errors across all cubes of a document so the caller
//! gets every problem in one pass. There is no warning level: any collected
//! diagnostic fails the compilation.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::model::EntityKind;
use crate::node::Location;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Category of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticCode {
    /// A collection key holds a mapping or scalar instead of a sequence
    Shape,
    /// A field value does not match its declared type, including null
    Type,
    /// `null` where a mapping was structurally required
    StructuralNull,
    /// A required `name` is absent
    MissingName,
    /// Pre-aggregation references and policy shapes
    Semantic,
    /// Two entities share a qualified name
    DuplicateName,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shape => "E001",
            Self::Type => "E002",
            Self::StructuralNull => "E003",
            Self::MissingName => "E004",
            Self::Semantic => "E005",
            Self::DuplicateName => "E006",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Path
// =============================================================================

/// Breadcrumb locating a diagnostic: cube, entity kind, entity name, field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticPath {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cube: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_kind: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl DiagnosticPath {
    pub fn cube(name: impl Into<String>) -> Self {
        Self {
            cube: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn entity(&self, kind: EntityKind, name: Option<&str>) -> Self {
        Self {
            cube: self.cube.clone(),
            entity_kind: Some(kind),
            entity_name: name.map(String::from),
            field: None,
        }
    }

    pub fn field(&self, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..self.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cube.is_none()
            && self.entity_kind.is_none()
            && self.entity_name.is_none()
            && self.field.is_none()
    }
}

impl fmt::Display for DiagnosticPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(cube) = &self.cube {
            parts.push(cube.clone());
        }
        match (&self.entity_kind, &self.entity_name) {
            (Some(kind), Some(name)) => parts.push(format!("{} {}", kind, name)),
            (Some(kind), None) => parts.push(kind.to_string()),
            _ => {}
        }
        if let Some(field) = &self.field {
            parts.push(field.clone());
        }
        write!(f, "{}", parts.join(" > "))
    }
}

// =============================================================================
// Diagnostic
// =============================================================================

/// A single path-qualified compilation error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    /// Message text; its wording is relied upon by callers
    pub message: String,
    pub path: DiagnosticPath,
    #[serde(serialize_with = "serialize_location")]
    pub location: Location,
}

fn serialize_location<S: Serializer>(location: &Location, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(location)
}

impl Diagnostic {
    pub fn new(
        code: DiagnosticCode,
        message: impl Into<String>,
        path: DiagnosticPath,
        location: Location,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            path,
            location,
        }
    }

    /// `<key> must be defined as array`
    pub fn not_an_array(key: &str, path: DiagnosticPath, location: Location) -> Self {
        Self::new(
            DiagnosticCode::Shape,
            format!("{} must be defined as array", key),
            path,
            location,
        )
    }

    /// `<Cube> cube: (<field> = <literal>) must be a <type>`
    pub fn type_mismatch(
        cube_label: &str,
        field: &str,
        literal: &str,
        expected: &str,
        path: DiagnosticPath,
        location: Location,
    ) -> Self {
        Self::new(
            DiagnosticCode::Type,
            format!("{} cube: ({} = {}) must be a {}", cube_label, field, literal, expected),
            path,
            location,
        )
    }

    /// `Unexpected input during transpiling: null`
    pub fn structural_null(path: DiagnosticPath, location: Location) -> Self {
        Self::new(
            DiagnosticCode::StructuralNull,
            "Unexpected input during transpiling: null",
            path,
            location,
        )
    }

    /// `name isn't defined for <kind>: <context>`
    pub fn missing_name(
        kind: EntityKind,
        context: &str,
        path: DiagnosticPath,
        location: Location,
    ) -> Self {
        Self::new(
            DiagnosticCode::MissingName,
            format!("name isn't defined for {}: {}", kind, context),
            path,
            location,
        )
    }

    /// `<Cube> cube: <message>`
    pub fn semantic(
        cube_label: &str,
        message: impl fmt::Display,
        path: DiagnosticPath,
        location: Location,
    ) -> Self {
        Self::new(
            DiagnosticCode::Semantic,
            format!("{} cube: {}", cube_label, message),
            path,
            location,
        )
    }

    pub fn duplicate_name(message: impl Into<String>, path: DiagnosticPath, location: Location) -> Self {
        Self::new(DiagnosticCode::DuplicateName, message, path, location)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (at {})", self.code, self.message, self.location)?;
        if !self.path.is_empty() {
            write!(f, "\n  - {}", self.path)?;
        }
        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Ordered collection of diagnostics from one compilation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic
    pub fn push(&mut self, item: Diagnostic) {
        self.items.push(item);
    }

    /// Record the error side of a result, keeping the value if there was one
    pub fn take<T>(&mut self, result: Result<T, Diagnostic>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(diagnostic) => {
                self.push(diagnostic);
                None
            }
        }
    }

    /// Get all items
    pub fn all(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Messages in collection order
    pub fn messages(&self) -> Vec<&str> {
        self.items.iter().map(|d| d.message.as_str()).collect()
    }

    /// Whether any message contains `needle`
    pub fn contains_message(&self, needle: &str) -> bool {
        self.items.iter().any(|d| d.message.contains(needle))
    }

    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.code == code)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// `Ok(value)` when nothing was collected
    pub fn into_result<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if !self.is_empty() {
            output.push_str(&format!("\n{} error(s)\n", self.len()));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl std::error::Error for Diagnostics {}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_templates() {
        let path = DiagnosticPath::cube("Users");
        let loc = Location::root().key("cubes").index(0);

        let d = Diagnostic::not_an_array("dimensions", path.clone(), loc.clone());
        assert_eq!(d.message, "dimensions must be defined as array");

        let d = Diagnostic::type_mismatch("Users", "title", "null", "string", path.clone(), loc.clone());
        assert_eq!(d.message, "Users cube: (title = null) must be a string");

        let d = Diagnostic::structural_null(DiagnosticPath::default(), loc.clone());
        assert_eq!(d.message, "Unexpected input during transpiling: null");

        let d = Diagnostic::missing_name(EntityKind::Dimension, "{\"sql\":\"id\"}", path, loc);
        assert_eq!(d.message, "name isn't defined for dimension: {\"sql\":\"id\"}");
    }

    #[test]
    fn test_path_display() {
        let path = DiagnosticPath::cube("Orders")
            .entity(EntityKind::PreAggregation, Some("main"))
            .field("refresh_key");
        assert_eq!(path.to_string(), "Orders > pre_aggregation main > refresh_key");
    }

    #[test]
    fn test_diagnostics_collection() {
        let mut diags = Diagnostics::new();
        assert!(diags.clone().into_result(()).is_ok());

        let ok: Option<u8> = diags.take(Ok(1));
        assert_eq!(ok, Some(1));
        let failed: Option<u8> = diags.take(Err(Diagnostic::structural_null(
            DiagnosticPath::default(),
            Location::root(),
        )));
        assert!(failed.is_none());

        assert_eq!(diags.len(), 1);
        assert!(diags.contains_message("transpiling: null"));
        assert_eq!(diags.with_code(DiagnosticCode::StructuralNull).count(), 1);
        assert!(diags.format_all().contains("1 error(s)"));
        assert!(diags.into_result(()).is_err());
    }
}
