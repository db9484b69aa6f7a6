//! Field coercion
//!
//! Converts single nodes into primitive values. A key can be absent, present
//! with an explicit `null`, or present with a value; the three states produce
//! different outcomes and are never collapsed.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::CoercionConfig;
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticPath};
use crate::model::EntityKind;
use crate::node::{GenericNode, Location, NodeKind};

/// Result of looking a key up in a mapping
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Absent,
    Null { key: &'a str, node: &'a GenericNode },
    Present { key: &'a str, node: &'a GenericNode },
}

impl<'a> FieldValue<'a> {
    pub fn from_entry(key: &'a str, node: &'a GenericNode) -> Self {
        if node.is_null() {
            FieldValue::Null { key, node }
        } else {
            FieldValue::Present { key, node }
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn node(&self) -> Option<&'a GenericNode> {
        match self {
            FieldValue::Absent => None,
            FieldValue::Null { node, .. } | FieldValue::Present { node, .. } => Some(node),
        }
    }
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"))
}

/// Coercion scope: which cube and entity a field belongs to
#[derive(Debug, Clone)]
pub struct FieldContext<'a> {
    pub cube_label: &'a str,
    pub path: DiagnosticPath,
    pub rules: &'a CoercionConfig,
}

impl<'a> FieldContext<'a> {
    pub fn new(cube_label: &'a str, path: DiagnosticPath, rules: &'a CoercionConfig) -> Self {
        Self {
            cube_label,
            path,
            rules,
        }
    }

    /// Same cube, narrower path
    pub fn with_path(&self, path: DiagnosticPath) -> Self {
        Self {
            cube_label: self.cube_label,
            path,
            rules: self.rules,
        }
    }

    pub fn mismatch(&self, key: &str, node: &GenericNode, expected: &str) -> Diagnostic {
        self.mismatch_literal(key, &node.render_literal(), node, expected)
    }

    fn mismatch_literal(&self, key: &str, literal: &str, node: &GenericNode, expected: &str) -> Diagnostic {
        Diagnostic::type_mismatch(
            self.cube_label,
            key,
            literal,
            expected,
            self.path.field(key),
            node.location.clone(),
        )
    }

    /// `<Cube> cube: (<field>) is required for <kind> <name>`
    pub fn required(&self, key: &str, entity: &str, location: &Location) -> Diagnostic {
        Diagnostic::new(
            DiagnosticCode::Type,
            format!("{} cube: ({}) is required for {}", self.cube_label, key, entity),
            self.path.field(key),
            location.clone(),
        )
    }

    /// Optional string; `''` is a value unless configured otherwise
    pub fn string(&self, value: FieldValue<'_>) -> Result<Option<String>, Diagnostic> {
        match value {
            FieldValue::Absent => Ok(None),
            FieldValue::Null { key, node } => Err(self.mismatch(key, node, "string")),
            FieldValue::Present { key, node } => match &node.kind {
                NodeKind::String(s) if s.is_empty() && self.rules.empty_string_as_null => {
                    Err(self.mismatch_literal(key, "null", node, "string"))
                }
                NodeKind::String(s) => Ok(Some(s.clone())),
                _ => Err(self.mismatch(key, node, "string")),
            },
        }
    }

    /// Opaque SQL text, returned exactly as written
    pub fn sql(&self, value: FieldValue<'_>) -> Result<Option<String>, Diagnostic> {
        match value {
            FieldValue::Present { node, .. } => match node.as_str() {
                Some(s) => Ok(Some(s.to_string())),
                None => self.string(value),
            },
            _ => self.string(value),
        }
    }

    pub fn boolean(&self, value: FieldValue<'_>) -> Result<Option<bool>, Diagnostic> {
        match value {
            FieldValue::Absent => Ok(None),
            FieldValue::Null { key, node } => Err(self.mismatch(key, node, "boolean")),
            FieldValue::Present { key, node } => node
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.mismatch(key, node, "boolean")),
        }
    }

    pub fn number(&self, value: FieldValue<'_>) -> Result<Option<serde_json::Number>, Diagnostic> {
        match value {
            FieldValue::Absent => Ok(None),
            FieldValue::Null { key, node } => Err(self.mismatch(key, node, "number")),
            FieldValue::Present { key, node } => node
                .as_number()
                .cloned()
                .map(Some)
                .ok_or_else(|| self.mismatch(key, node, "number")),
        }
    }

    /// String drawn from a closed vocabulary
    pub fn one_of<T>(
        &self,
        value: FieldValue<'_>,
        parse: impl Fn(&str) -> Option<T>,
        allowed: &[&str],
    ) -> Result<Option<T>, Diagnostic> {
        let (key, node) = match value {
            FieldValue::Absent => return Ok(None),
            FieldValue::Null { key, node } => return Err(self.mismatch(key, node, "string")),
            FieldValue::Present { key, node } => (key, node),
        };
        let Some(text) = self.string(value)? else {
            return Ok(None);
        };
        parse(&text).map(Some).ok_or_else(|| {
            Diagnostic::new(
                DiagnosticCode::Type,
                format!(
                    "{} cube: ({} = {}) must be one of [{}]",
                    self.cube_label,
                    key,
                    text,
                    allowed.join(", ")
                ),
                self.path.field(key),
                node.location.clone(),
            )
        })
    }

    /// Required entity name
    ///
    /// `owner` is the mapping the name belongs to; it is rendered into the
    /// message when the key is missing so the entity can still be found.
    pub fn name(
        &self,
        value: FieldValue<'_>,
        kind: EntityKind,
        owner: &GenericNode,
    ) -> Result<String, Diagnostic> {
        match value {
            FieldValue::Absent => Err(Diagnostic::missing_name(
                kind,
                &owner.render_literal(),
                self.path.clone(),
                owner.location.clone(),
            )),
            FieldValue::Null { key, node } => Err(self.mismatch(key, node, "string")),
            FieldValue::Present { key, node } => {
                let Some(name) = node.as_str() else {
                    return Err(self.mismatch(key, node, "string"));
                };
                if name.is_empty() {
                    return Err(self.mismatch(key, node, "non-empty string"));
                }
                if self.rules.strict_identifiers && !identifier_regex().is_match(name) {
                    return Err(self.mismatch(key, node, "valid identifier"));
                }
                Ok(name.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse;

    fn field<'a>(root: &'a GenericNode, key: &'a str) -> FieldValue<'a> {
        match root.get(key) {
            Some(node) => FieldValue::from_entry(key, node),
            None => FieldValue::Absent,
        }
    }

    fn ctx(rules: &CoercionConfig) -> FieldContext<'_> {
        FieldContext::new("Users", DiagnosticPath::cube("Users"), rules)
    }

    #[test]
    fn test_string_three_states() {
        let rules = CoercionConfig::default();
        let root = parse("title: null\ndescription: ''\nsql: x\n").unwrap();
        let ctx = ctx(&rules);

        assert_eq!(ctx.string(field(&root, "missing")).unwrap(), None);
        assert_eq!(ctx.string(field(&root, "description")).unwrap(), Some(String::new()));
        let err = ctx.string(field(&root, "title")).unwrap_err();
        assert_eq!(err.message, "Users cube: (title = null) must be a string");
        assert_eq!(err.path.field.as_deref(), Some("title"));
    }

    #[test]
    fn test_empty_string_as_null_rule() {
        let rules = CoercionConfig {
            empty_string_as_null: true,
            ..Default::default()
        };
        let root = parse("title: ''\n").unwrap();
        let err = ctx(&rules).string(field(&root, "title")).unwrap_err();
        assert_eq!(err.message, "Users cube: (title = null) must be a string");
    }

    #[test]
    fn test_type_mismatches() {
        let rules = CoercionConfig::default();
        let root = parse("title: 5\nshown: 'yes'\nrank: true\n").unwrap();
        let ctx = ctx(&rules);

        assert_eq!(
            ctx.string(field(&root, "title")).unwrap_err().message,
            "Users cube: (title = 5) must be a string"
        );
        assert_eq!(
            ctx.boolean(field(&root, "shown")).unwrap_err().message,
            "Users cube: (shown = yes) must be a boolean"
        );
        assert_eq!(
            ctx.number(field(&root, "rank")).unwrap_err().message,
            "Users cube: (rank = true) must be a number"
        );
    }

    #[test]
    fn test_sql_is_identity() {
        let rules = CoercionConfig::default();
        let root = parse("sql: \"{CUBE}.`C2` = 'it''s'\"\n").unwrap();
        let sql = ctx(&rules).sql(field(&root, "sql")).unwrap().unwrap();
        assert_eq!(sql, "{CUBE}.`C2` = 'it''s'");
    }

    #[test]
    fn test_name_rules() {
        let rules = CoercionConfig::default();
        let ctx = ctx(&rules);

        let root = parse("sql: id\ntype: number\n").unwrap();
        let err = ctx.name(field(&root, "name"), EntityKind::Dimension, &root).unwrap_err();
        assert!(err.message.starts_with("name isn't defined for dimension: "));
        assert!(err.message.contains("\"sql\":\"id\""));

        let root = parse("name: 'my-cube'\n").unwrap();
        let err = ctx.name(field(&root, "name"), EntityKind::Cube, &root).unwrap_err();
        assert_eq!(err.message, "Users cube: (name = my-cube) must be a valid identifier");

        let root = parse("name: users_2\n").unwrap();
        assert_eq!(ctx.name(field(&root, "name"), EntityKind::Cube, &root).unwrap(), "users_2");
    }

    #[test]
    fn test_one_of() {
        let rules = CoercionConfig::default();
        let root = parse("type: median\n").unwrap();
        let err = ctx(&rules)
            .one_of(field(&root, "type"), crate::model::MeasureType::parse, &["count", "sum"])
            .unwrap_err();
        assert_eq!(err.message, "Users cube: (type = median) must be one of [count, sum]");
    }
}
