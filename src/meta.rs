//! Metadata projection
//!
//! Read-only view of a compiled schema for an API layer: per cube, the
//! dimensions, measures and segments flattened and qualified with the cube
//! name. Descriptions and meta bags reach consumers only through here.

use serde::Serialize;

use crate::compiler::CompiledSchema;
use crate::model::{CubeEntity, MetaBag};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataView {
    pub cubes: Vec<CubeMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeMeta {
    pub name: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaBag>,
    pub public: bool,
    pub dimensions: Vec<MemberMeta>,
    pub measures: Vec<MemberMeta>,
    pub segments: Vec<MemberMeta>,
}

/// A dimension, measure or segment as seen from outside the compiler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMeta {
    /// `Cube.member`
    pub name: String,
    pub title: String,
    pub short_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Absent for segments
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaBag>,
    pub shown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<bool>,
}

impl MetadataView {
    pub fn cube(&self, name: &str) -> Option<&CubeMeta> {
        self.cubes.iter().find(|c| c.name == name)
    }

    /// Look up a member by qualified name
    pub fn member(&self, qualified: &str) -> Option<&MemberMeta> {
        let (cube, _) = qualified.split_once('.')?;
        self.cube(cube)?.members().find(|m| m.name == qualified)
    }
}

impl CubeMeta {
    pub fn members(&self) -> impl Iterator<Item = &MemberMeta> {
        self.dimensions
            .iter()
            .chain(self.measures.iter())
            .chain(self.segments.iter())
    }
}

/// `order_status` / `orderStatus` -> `Order Status`
pub fn humanize(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == ' ' || (c.is_uppercase() && prev_lower) {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            if c == '_' || c == ' ' {
                continue;
            }
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

struct MemberSource<'a> {
    name: &'a str,
    title: Option<&'a str>,
    description: Option<&'a str>,
    member_type: Option<String>,
    meta: Option<&'a MetaBag>,
    shown: bool,
    primary_key: Option<bool>,
}

fn member(cube: &CubeEntity, cube_title: &str, source: MemberSource<'_>) -> MemberMeta {
    let short_title = source
        .title
        .map(str::to_string)
        .unwrap_or_else(|| humanize(source.name));
    MemberMeta {
        name: cube.qualify(source.name),
        title: format!("{} {}", cube_title, short_title),
        short_title,
        description: source.description.map(str::to_string),
        member_type: source.member_type,
        meta: source.meta.cloned(),
        shown: source.shown,
        primary_key: source.primary_key,
    }
}

fn project_cube(cube: &CubeEntity) -> CubeMeta {
    let title = cube.title.clone().unwrap_or_else(|| humanize(&cube.name));

    let dimensions = cube
        .dimensions
        .iter()
        .map(|d| {
            member(
                cube,
                &title,
                MemberSource {
                    name: &d.name,
                    title: d.title.as_deref(),
                    description: d.description.as_deref(),
                    member_type: Some(d.dimension_type.to_string()),
                    meta: d.meta.as_ref(),
                    shown: d.shown,
                    primary_key: Some(d.primary_key),
                },
            )
        })
        .collect();

    let measures = cube
        .measures
        .iter()
        .map(|m| {
            member(
                cube,
                &title,
                MemberSource {
                    name: &m.name,
                    title: m.title.as_deref(),
                    description: m.description.as_deref(),
                    member_type: Some(m.measure_type.to_string()),
                    meta: m.meta.as_ref(),
                    shown: m.shown,
                    primary_key: None,
                },
            )
        })
        .collect();

    let segments = cube
        .segments
        .iter()
        .map(|s| {
            member(
                cube,
                &title,
                MemberSource {
                    name: &s.name,
                    title: s.title.as_deref(),
                    description: s.description.as_deref(),
                    member_type: None,
                    meta: s.meta.as_ref(),
                    shown: s.shown,
                    primary_key: None,
                },
            )
        })
        .collect();

    CubeMeta {
        name: cube.name.clone(),
        title,
        description: cube.description.clone(),
        meta: cube.meta.clone(),
        public: cube.public,
        dimensions,
        measures,
        segments,
    }
}

/// Build the metadata view of a compiled schema
pub fn project(schema: &CompiledSchema) -> MetadataView {
    MetadataView {
        cubes: schema.cubes().iter().map(project_cube).collect(),
    }
}
