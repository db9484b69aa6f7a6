//! Shape normalization
//!
//! Enforces the collection-vs-scalar contracts YAML itself cannot express and
//! hands the transpiler uniform views: [`Fields`] for mappings (keys looked up
//! in either `snake_case` or `camelCase`) and plain node lists for collections.
//! A malformed collection is rejected as a whole before any member is looked at.

use tracing::trace;

use crate::coerce::FieldValue;
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticPath};
use crate::node::GenericNode;

/// `pre_aggregations` and `preAggregations` both become `preAggregations`
pub fn canonical_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' && !out.is_empty() {
            upper = true;
            continue;
        }
        if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// A mapping node whose keys have been canonicalised
#[derive(Debug)]
pub struct Fields<'a> {
    node: &'a GenericNode,
    /// (canonical key, authored key, value)
    entries: Vec<(String, &'a str, &'a GenericNode)>,
}

impl<'a> Fields<'a> {
    /// `what` names the expected object in shape errors, e.g. `cube`
    pub fn new(node: &'a GenericNode, what: &str, path: &DiagnosticPath) -> Result<Self, Diagnostic> {
        let Some(mapping) = node.as_mapping() else {
            return Err(if node.is_null() {
                Diagnostic::structural_null(path.clone(), node.location.clone())
            } else {
                Diagnostic::new(
                    DiagnosticCode::Shape,
                    format!("{} must be defined as object", what),
                    path.clone(),
                    node.location.clone(),
                )
            });
        };

        let mut entries: Vec<(String, &'a str, &'a GenericNode)> = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let canonical = canonical_key(key);
            if let Some((_, first, _)) = entries.iter().find(|(c, _, _)| *c == canonical) {
                return Err(Diagnostic::new(
                    DiagnosticCode::Shape,
                    format!("duplicate key {} (already defined as {})", key, first),
                    path.field(key.as_str()),
                    value.location.clone(),
                ));
            }
            entries.push((canonical, key.as_str(), value));
        }

        Ok(Self { node, entries })
    }

    pub fn node(&self) -> &'a GenericNode {
        self.node
    }

    /// Look up a canonical (camelCase) key
    pub fn get(&self, key: &str) -> FieldValue<'a> {
        self.entries
            .iter()
            .find(|(canonical, _, _)| canonical == key)
            .map(|(_, raw, node)| FieldValue::from_entry(raw, node))
            .unwrap_or(FieldValue::Absent)
    }

    /// Authored spelling of a canonical key, or the canonical key itself
    pub fn authored<'k>(&self, key: &'k str) -> &'k str
    where
        'a: 'k,
    {
        self.entries
            .iter()
            .find(|(canonical, _, _)| canonical == key)
            .map(|(_, raw, _)| *raw)
            .unwrap_or(key)
    }

    /// Trace keys outside `known`; unknown keys never fail compilation
    pub fn trace_unknown(&self, known: &[&str]) {
        for (canonical, raw, node) in &self.entries {
            if !known.contains(&canonical.as_str()) {
                trace!(key = %raw, location = %node.location, "ignoring unknown key");
            }
        }
    }
}

/// A collection key's value as a list of nodes
///
/// Absent keys yield an empty list. Anything but a sequence (including an
/// explicit `null`) fails with `<key> must be defined as array`.
pub fn sequence<'a>(
    fields: &Fields<'a>,
    key: &str,
    path: &DiagnosticPath,
) -> Result<Vec<&'a GenericNode>, Diagnostic> {
    match fields.get(key) {
        FieldValue::Absent => Ok(Vec::new()),
        FieldValue::Null { key, node } | FieldValue::Present { key, node } => match node.as_sequence() {
            Some(items) => Ok(items.iter().collect()),
            None => Err(Diagnostic::not_an_array(key, path.field(key), node.location.clone())),
        },
    }
}

/// A collection of entity definitions: a sequence whose members are mappings
///
/// A `null` member is a structural null; any other non-mapping member
/// rejects the whole collection.
pub fn collection<'a>(
    fields: &Fields<'a>,
    key: &str,
    path: &DiagnosticPath,
) -> Result<Vec<&'a GenericNode>, Diagnostic> {
    let members = sequence(fields, key, path)?;
    let authored = fields.authored(key);
    for member in &members {
        if member.is_null() {
            return Err(Diagnostic::structural_null(path.field(authored), member.location.clone()));
        }
        if member.as_mapping().is_none() {
            return Err(Diagnostic::new(
                DiagnosticCode::Shape,
                format!("{} must be defined as array of objects", authored),
                path.field(authored),
                member.location.clone(),
            ));
        }
    }
    Ok(members)
}

/// Cube bodies declared by a document
///
/// Empty and comment-only documents, and an empty `cubes:` key, declare no
/// cubes. Individual bodies are returned unchecked so one bad cube does not
/// hide the others.
pub fn document_cubes(root: &GenericNode) -> Result<Vec<&GenericNode>, Diagnostic> {
    if root.is_null() {
        return Ok(Vec::new());
    }
    let path = DiagnosticPath::default();
    let fields = Fields::new(root, "document", &path)?;
    fields.trace_unknown(&["cubes"]);

    match fields.get("cubes") {
        FieldValue::Null { .. } => Ok(Vec::new()),
        _ => sequence(&fields, "cubes", &path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("pre_aggregations"), "preAggregations");
        assert_eq!(canonical_key("primaryKey"), "primaryKey");
        assert_eq!(canonical_key("build_range_start"), "buildRangeStart");
        assert_eq!(canonical_key("name"), "name");
    }

    #[test]
    fn test_mapping_instead_of_array() {
        let root = parse("dimensions:\n  name: Title\n  sql: name\n").unwrap();
        let fields = Fields::new(&root, "cube", &DiagnosticPath::cube("Products")).unwrap();
        let err = collection(&fields, "dimensions", &DiagnosticPath::cube("Products")).unwrap_err();
        assert_eq!(err.message, "dimensions must be defined as array");
        assert_eq!(err.code, DiagnosticCode::Shape);
    }

    #[test]
    fn test_scalar_and_null_collections() {
        let root = parse("measures: count\nsegments: null\n").unwrap();
        let path = DiagnosticPath::default();
        let fields = Fields::new(&root, "cube", &path).unwrap();
        assert_eq!(
            collection(&fields, "measures", &path).unwrap_err().message,
            "measures must be defined as array"
        );
        assert_eq!(
            collection(&fields, "segments", &path).unwrap_err().message,
            "segments must be defined as array"
        );
        assert!(collection(&fields, "joins", &path).unwrap().is_empty());
    }

    #[test]
    fn test_non_mapping_members() {
        let root = parse("dimensions:\n  - name: id\n  - id\n").unwrap();
        let path = DiagnosticPath::default();
        let fields = Fields::new(&root, "cube", &path).unwrap();
        let err = collection(&fields, "dimensions", &path).unwrap_err();
        assert_eq!(err.message, "dimensions must be defined as array of objects");

        let root = parse("dimensions:\n  - null\n").unwrap();
        let fields = Fields::new(&root, "cube", &path).unwrap();
        let err = collection(&fields, "dimensions", &path).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::StructuralNull);
    }

    #[test]
    fn test_snake_and_camel_lookup() {
        let root = parse("pre_aggregations: []\nprimaryKey: true\n").unwrap();
        let fields = Fields::new(&root, "cube", &DiagnosticPath::default()).unwrap();
        assert!(!fields.get("preAggregations").is_absent());
        assert_eq!(fields.authored("preAggregations"), "pre_aggregations");
        assert!(!fields.get("primaryKey").is_absent());
    }

    #[test]
    fn test_duplicate_spellings_rejected() {
        let root = parse("primary_key: true\nprimaryKey: false\n").unwrap();
        let err = Fields::new(&root, "dimension", &DiagnosticPath::default()).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::Shape);
        assert!(err.message.contains("duplicate key primaryKey"));
    }

    #[test]
    fn test_document_cubes() {
        assert!(document_cubes(&parse("").unwrap()).unwrap().is_empty());
        assert!(document_cubes(&parse("cubes:\n").unwrap()).unwrap().is_empty());
        assert_eq!(document_cubes(&parse("cubes:\n  - null\n  - name: A\n").unwrap()).unwrap().len(), 2);
        assert_eq!(
            document_cubes(&parse("cubes:\n  name: A\n").unwrap()).unwrap_err().message,
            "cubes must be defined as array"
        );
    }
}
