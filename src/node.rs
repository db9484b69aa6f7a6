//! Generic node tree
//!
//! The compiler never works on YAML types directly. Text is parsed once into a
//! [`GenericNode`] tree (scalars, sequences, ordered mappings) where every node
//! remembers where it came from, and everything downstream walks that tree.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserialize, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::Result;

/// Structural position of a node: `orders.yml:cubes[0].dimensions[1].sql`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    document: Option<Arc<str>>,
    path: String,
}

impl Location {
    /// Root of an unnamed document
    pub fn root() -> Self {
        Self::default()
    }

    /// Root of a named document (usually a file name)
    pub fn document(name: &str) -> Self {
        Self {
            document: Some(Arc::from(name)),
            path: String::new(),
        }
    }

    /// Location of a mapping value
    pub fn key(&self, key: &str) -> Self {
        let path = if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        };
        Self {
            document: self.document.clone(),
            path,
        }
    }

    /// Location of a sequence item
    pub fn index(&self, index: usize) -> Self {
        Self {
            document: self.document.clone(),
            path: format!("{}[{}]", self.path, index),
        }
    }

    pub fn document_name(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        match &self.document {
            Some(document) => write!(f, "{}:{}", document, path),
            None => write!(f, "{}", path),
        }
    }
}

/// Value held by a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Sequence(Vec<GenericNode>),
    /// Entries in declaration order
    Mapping(Vec<(String, GenericNode)>),
}

/// A parsed node with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct GenericNode {
    pub kind: NodeKind,
    pub location: Location,
}

impl GenericNode {
    pub fn new(kind: NodeKind, location: Location) -> Self {
        Self { kind, location }
    }

    pub fn null(location: Location) -> Self {
        Self::new(NodeKind::Null, location)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, NodeKind::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            NodeKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&serde_json::Number> {
        match &self.kind {
            NodeKind::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[GenericNode]> {
        match &self.kind {
            NodeKind::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&[(String, GenericNode)]> {
        match &self.kind {
            NodeKind::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a mapping value by its exact key
    pub fn get(&self, key: &str) -> Option<&GenericNode> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Human-readable kind, used in shape diagnostics
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Null => "null",
            NodeKind::Bool(_) => "boolean",
            NodeKind::Number(_) => "number",
            NodeKind::String(_) => "string",
            NodeKind::Sequence(_) => "array",
            NodeKind::Mapping(_) => "object",
        }
    }

    /// Literal form used inside `(field = literal)` messages
    pub fn render_literal(&self) -> String {
        match &self.kind {
            NodeKind::Null => "null".to_string(),
            NodeKind::Bool(b) => b.to_string(),
            NodeKind::Number(n) => n.to_string(),
            NodeKind::String(s) => s.clone(),
            NodeKind::Sequence(_) | NodeKind::Mapping(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl Serialize for GenericNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.kind {
            NodeKind::Null => serializer.serialize_unit(),
            NodeKind::Bool(b) => serializer.serialize_bool(*b),
            NodeKind::Number(n) => n.serialize(serializer),
            NodeKind::String(s) => serializer.serialize_str(s),
            NodeKind::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            NodeKind::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Parse an unnamed YAML document into a node tree
pub fn parse(text: &str) -> Result<GenericNode> {
    parse_at(text, Location::root())
}

/// Parse a YAML document whose locations are prefixed with `name`
pub fn parse_named(name: &str, text: &str) -> Result<GenericNode> {
    parse_at(text, Location::document(name))
}

fn parse_at(text: &str, root: Location) -> Result<GenericNode> {
    if is_blank_document(text) {
        return Ok(GenericNode::null(root));
    }
    let mut node: GenericNode = serde_yaml::from_str(text)?;
    node.locate(root);
    Ok(node)
}

/// Empty, whitespace-only and comment-only documents
fn is_blank_document(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

impl GenericNode {
    /// Assign structural locations below `location`
    fn locate(&mut self, location: Location) {
        match &mut self.kind {
            NodeKind::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    item.locate(location.index(i));
                }
            }
            NodeKind::Mapping(entries) => {
                for (key, value) in entries.iter_mut() {
                    value.locate(location.key(key));
                }
            }
            _ => {}
        }
        self.location = location;
    }
}

/// Builds the tree straight from the YAML event stream
///
/// Mappings keep every entry, repeated keys included, so that a repeated
/// key becomes a diagnostic on its cube instead of a parse failure.
impl<'de> Deserialize<'de> for GenericNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

fn unlocated(kind: NodeKind) -> GenericNode {
    GenericNode::new(kind, Location::root())
}

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = GenericNode;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a YAML value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::Null))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::Null))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<GenericNode, D::Error> {
        GenericNode::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::Bool(value)))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::Number(value.into())))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::Number(value.into())))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<GenericNode, E> {
        serde_json::Number::from_f64(value)
            .map(|n| unlocated(NodeKind::Number(n)))
            .ok_or_else(|| E::custom(format!("unsupported non-finite number {}", value)))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::String(value.to_string())))
    }

    fn visit_string<E: de::Error>(self, value: String) -> std::result::Result<GenericNode, E> {
        Ok(unlocated(NodeKind::String(value)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<GenericNode, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<GenericNode>()? {
            items.push(item);
        }
        Ok(unlocated(NodeKind::Sequence(items)))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<GenericNode, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<GenericNode, GenericNode>()? {
            let key = match key.kind {
                NodeKind::String(s) => s,
                NodeKind::Null => "null".to_string(),
                NodeKind::Bool(b) => b.to_string(),
                NodeKind::Number(n) => n.to_string(),
                NodeKind::Sequence(_) | NodeKind::Mapping(_) => {
                    return Err(de::Error::custom("mapping keys must be scalars"))
                }
            };
            entries.push((key, value));
        }
        Ok(unlocated(NodeKind::Mapping(entries)))
    }

    /// Tagged values (`!tag value`) keep only their value
    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> std::result::Result<GenericNode, A::Error> {
        let (_tag, variant) = data.variant::<de::IgnoredAny>()?;
        variant.newtype_variant::<GenericNode>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_documents_parse_to_null() {
        assert!(parse("").unwrap().is_null());
        assert!(parse("   \n\t\n").unwrap().is_null());
        assert!(parse("#cubes:\n#- name: Products\n").unwrap().is_null());
    }

    #[test]
    fn test_mapping_order_and_locations() {
        let root = parse("cubes:\n  - name: Users\n    sql: select 1\n").unwrap();
        let cubes = root.get("cubes").unwrap();
        let first = &cubes.as_sequence().unwrap()[0];
        let keys: Vec<_> = first.as_mapping().unwrap().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["name", "sql"]);
        assert_eq!(first.get("sql").unwrap().location.to_string(), "cubes[0].sql");
    }

    #[test]
    fn test_named_document_location() {
        let root = parse_named("users.yml", "cubes: []").unwrap();
        assert_eq!(root.get("cubes").unwrap().location.to_string(), "users.yml:cubes");
    }

    #[test]
    fn test_scalar_states_are_distinct() {
        let root = parse("a: null\nb: 'null'\nc: ''\n").unwrap();
        assert!(root.get("a").unwrap().is_null());
        assert_eq!(root.get("b").unwrap().as_str(), Some("null"));
        assert_eq!(root.get("c").unwrap().as_str(), Some(""));
    }

    #[test]
    fn test_repeated_keys_are_kept() {
        let root = parse("a: 1\na: 2\n").unwrap();
        let entries = root.as_mapping().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1.render_literal(), "2");
        assert_eq!(entries[1].1.location.to_string(), "a");
    }

    #[test]
    fn test_serialize_preserves_order() {
        let root = parse("z: 1\na: [1, foo, 3]\n").unwrap();
        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(json, r#"{"z":1,"a":[1,"foo",3]}"#);
    }

    #[test]
    fn test_render_literal() {
        let root = parse("a: null\nb: 1.5\nc: [1]\n").unwrap();
        assert_eq!(root.get("a").unwrap().render_literal(), "null");
        assert_eq!(root.get("b").unwrap().render_literal(), "1.5");
        assert_eq!(root.get("c").unwrap().render_literal(), "[1]");
    }
}
