//! Schema compiler
//!
//! Drives the pipeline over one or more documents: every cube is transpiled
//! independently, pre-aggregations are validated against their owning cube,
//! and schema-wide rules (unique names, cross-cube references, join targets)
//! run once the full set of cubes is known.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::checksum::Checksum;
use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticPath, Diagnostics};
use crate::error::{Result, SchemaError};
use crate::meta::{self, MetadataView};
use crate::model::{CubeEntity, EntityKind};
use crate::node::{self, GenericNode, Location};
use crate::preagg::{self, DeferredReference, PreAggregationValidator};
use crate::shape;
use crate::transpile::{CubeHeader, Transpiler};

/// The canonical entity set produced by a successful compilation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSchema {
    cubes: Vec<CubeEntity>,
}

impl CompiledSchema {
    pub fn cubes(&self) -> &[CubeEntity] {
        &self.cubes
    }

    pub fn cube(&self, name: &str) -> Option<&CubeEntity> {
        self.cubes.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    pub fn metadata_view(&self) -> MetadataView {
        meta::project(self)
    }

    /// SHA-256 over the canonical JSON of the compiled cubes
    pub fn fingerprint(&self) -> Checksum {
        Checksum::from_serialize(&self.cubes)
    }
}

/// Compiles cube documents with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct SchemaCompiler {
    config: CompilerConfig,
}

impl SchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile one parsed document
    pub fn compile(&self, document: &GenericNode) -> std::result::Result<CompiledSchema, Diagnostics> {
        self.compile_nodes(std::slice::from_ref(document))
    }

    /// Parse and compile one document
    pub fn compile_str(&self, text: &str) -> Result<CompiledSchema> {
        let document = node::parse(text)?;
        Ok(self.compile(&document)?)
    }

    /// Compile named documents into one schema
    ///
    /// Cube names must be unique across all documents.
    pub fn compile_documents<N, T>(&self, documents: &[(N, T)]) -> Result<CompiledSchema>
    where
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let roots = documents
            .iter()
            .map(|(name, text)| node::parse_named(name.as_ref(), text.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.compile_nodes(&roots)?)
    }

    /// Compile every `*.yml` / `*.yaml` file under `path`, in path order
    pub fn compile_dir(&self, path: impl AsRef<Path>) -> Result<CompiledSchema> {
        let documents = load_documents(path.as_ref())?;
        self.compile_documents(&documents)
    }

    fn compile_nodes(&self, roots: &[GenericNode]) -> std::result::Result<CompiledSchema, Diagnostics> {
        let mut diags = Diagnostics::new();
        let transpiler = Transpiler::new(&self.config);

        let mut headers = Vec::new();
        for root in roots {
            let Some(bodies) = diags.take(shape::document_cubes(root)) else {
                continue;
            };
            headers.extend(bodies.into_iter().filter_map(|body| diags.take(transpiler.header(body))));
        }

        let cubes: Vec<CubeEntity> = headers
            .iter()
            .filter_map(|header| transpiler.cube(header, &mut diags))
            .collect();

        let validator = PreAggregationValidator::new(&self.config.granularity);
        let mut deferred = Vec::new();
        for cube in &cubes {
            for pre_agg in &cube.pre_aggregations {
                let validation = validator.validate(pre_agg, cube);
                diags.merge(validation.diagnostics);
                deferred.extend(validation.deferred);
            }
        }

        let passes = SchemaPasses {
            headers: &headers,
            cubes: &cubes,
        };
        passes.unique_cube_names(&mut diags);
        passes.unique_member_names(&mut diags);
        passes.unique_pre_aggregation_names(&mut diags);
        passes.resolve_deferred(&deferred, &mut diags);
        passes.join_targets(&mut diags);

        info!(
            documents = roots.len(),
            cubes = cubes.len(),
            diagnostics = diags.len(),
            "compiled schema"
        );
        diags.into_result(CompiledSchema { cubes })
    }
}

/// Rules that need every cube of the schema
struct SchemaPasses<'s, 'a> {
    /// Every cube that got a name, including ones that failed to transpile
    headers: &'s [CubeHeader<'a>],
    cubes: &'s [CubeEntity],
}

impl SchemaPasses<'_, '_> {
    fn cube(&self, name: &str) -> Option<&CubeEntity> {
        self.cubes.iter().find(|c| c.name == name)
    }

    fn declared(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h.name == name)
    }

    fn unique_cube_names(&self, diags: &mut Diagnostics) {
        let mut seen: HashMap<&str, &Location> = HashMap::new();
        for header in self.headers {
            match seen.get(header.name.as_str()) {
                Some(first) => diags.push(Diagnostic::duplicate_name(
                    format!("Cube {} is defined more than once (first at {})", header.name, first),
                    DiagnosticPath::cube(&header.name),
                    header.location.clone(),
                )),
                None => {
                    seen.insert(&header.name, &header.location);
                }
            }
        }
    }

    fn unique_member_names(&self, diags: &mut Diagnostics) {
        for cube in self.cubes {
            let members = cube
                .dimensions
                .iter()
                .map(|d| (EntityKind::Dimension, &d.name, &d.location))
                .chain(cube.measures.iter().map(|m| (EntityKind::Measure, &m.name, &m.location)))
                .chain(cube.segments.iter().map(|s| (EntityKind::Segment, &s.name, &s.location)));

            let mut seen: HashMap<String, EntityKind> = HashMap::new();
            for (kind, name, location) in members {
                let qualified = cube.qualify(name);
                if let Some(first) = seen.get(&qualified) {
                    diags.push(Diagnostic::duplicate_name(
                        format!("{} is defined more than once (as {} and {})", qualified, first, kind),
                        DiagnosticPath::cube(&cube.name).entity(kind, Some(name.as_str())),
                        location.clone(),
                    ));
                } else {
                    seen.insert(qualified, kind);
                }
            }
        }
    }

    fn unique_pre_aggregation_names(&self, diags: &mut Diagnostics) {
        for cube in self.cubes {
            let mut seen = HashSet::new();
            for pre_agg in &cube.pre_aggregations {
                if !seen.insert(pre_agg.name.as_str()) {
                    diags.push(Diagnostic::duplicate_name(
                        format!(
                            "Pre-aggregation {} is defined more than once",
                            cube.qualify(&pre_agg.name)
                        ),
                        DiagnosticPath::cube(&cube.name)
                            .entity(EntityKind::PreAggregation, Some(&pre_agg.name)),
                        pre_agg.location.clone(),
                    ));
                }
            }
        }
    }

    fn resolve_deferred(&self, deferred: &[DeferredReference], diags: &mut Diagnostics) {
        for reference in deferred {
            let target_name = reference.reference.cube.as_deref().unwrap_or(&reference.cube);
            let problem = match self.cube(target_name) {
                Some(target) => reference
                    .target
                    .check(target, &reference.reference.member)
                    .map(|problem| {
                        preagg::with_suggestion(
                            problem,
                            &reference.reference.member,
                            reference.target.candidates(target),
                        )
                    }),
                // The target's own diagnostics already explain why it is missing
                None if self.declared(target_name) => None,
                None => Some(preagg::with_suggestion(
                    format!("references unknown cube '{}'", target_name),
                    target_name,
                    self.headers.iter().map(|h| h.name.as_str()),
                )),
            };

            if let Some(problem) = problem {
                diags.push(Diagnostic::semantic(
                    &reference.cube,
                    format!("pre-aggregation {} {}", reference.pre_aggregation, problem),
                    reference.path(),
                    reference.location.clone(),
                ));
            }
        }
    }

    fn join_targets(&self, diags: &mut Diagnostics) {
        for cube in self.cubes {
            for join in &cube.joins {
                if self.declared(&join.name) {
                    continue;
                }
                diags.push(Diagnostic::semantic(
                    &cube.name,
                    preagg::with_suggestion(
                        format!("join references unknown cube '{}'", join.name),
                        &join.name,
                        self.headers.iter().map(|h| h.name.as_str()),
                    ),
                    DiagnosticPath::cube(&cube.name).entity(EntityKind::Join, Some(&join.name)),
                    join.location.clone(),
                ));
            }
        }
    }
}

/// Read model documents from a file or a directory tree
///
/// Directories are walked recursively for `*.yml` / `*.yaml` files in path
/// order; documents are named by their path relative to `root`.
pub fn load_documents(root: &Path) -> Result<Vec<(String, String)>> {
    fs::metadata(root).map_err(|source| SchemaError::Read {
        path: root.display().to_string(),
        source,
    })?;
    let mut documents = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let file = entry.path();
        if !file.is_file() {
            continue;
        }
        if !file
            .extension()
            .map(|ext| ext == "yml" || ext == "yaml")
            .unwrap_or(false)
        {
            continue;
        }

        let name = file
            .strip_prefix(root)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
            .unwrap_or(file)
            .to_string_lossy()
            .into_owned();
        let text = fs::read_to_string(file).map_err(|source| SchemaError::Read {
            path: file.display().to_string(),
            source,
        })?;
        debug!(document = %name, "loaded document");
        documents.push((name, text));
    }

    Ok(documents)
}

/// Read model documents from several files or directories
///
/// A single root names documents as [`load_documents`] does. With more than
/// one root, documents found under a directory keep the directory as a
/// prefix so that equal relative paths stay distinct.
pub fn load_sources<P: AsRef<Path>>(roots: &[P]) -> Result<Vec<(String, String)>> {
    if let [root] = roots {
        return load_documents(root.as_ref());
    }

    let mut documents = Vec::new();
    for root in roots {
        let root = root.as_ref();
        let loaded = load_documents(root)?;
        if root.is_dir() {
            documents.extend(
                loaded
                    .into_iter()
                    .map(|(name, text)| (root.join(name).display().to_string(), text)),
            );
        } else {
            documents.extend(loaded);
        }
    }
    Ok(documents)
}

/// Compile one parsed document with the default configuration
pub fn compile(document: &GenericNode) -> std::result::Result<CompiledSchema, Diagnostics> {
    SchemaCompiler::default().compile(document)
}

/// Parse and compile one document with the default configuration
pub fn compile_str(text: &str) -> Result<CompiledSchema> {
    SchemaCompiler::default().compile_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;

    fn diagnostics(yaml: &str) -> Diagnostics {
        let document = node::parse(yaml).unwrap();
        compile(&document).unwrap_err()
    }

    #[test]
    fn test_empty_documents() {
        for text in ["", "   \n", "# cubes:\n#   - name: Orders\n", "cubes:\n"] {
            let schema = compile_str(text).unwrap();
            assert!(schema.is_empty());
        }
    }

    #[test]
    fn test_duplicate_cube_names() {
        let diags = diagnostics(
            "cubes:\n  - name: Orders\n    sql: SELECT 1\n  - name: Orders\n    sql: SELECT 2\n",
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.all()[0].code, DiagnosticCode::DuplicateName);
        assert!(diags.all()[0].message.starts_with("Cube Orders is defined more than once"));
    }

    #[test]
    fn test_duplicate_member_names() {
        let diags = diagnostics(
            r#"
cubes:
  - name: Orders
    sql: SELECT 1
    dimensions:
      - name: count
        sql: count
        type: number
    measures:
      - name: count
        type: count
"#,
        );
        assert_eq!(diags.messages(), vec!["Orders.count is defined more than once (as dimension and measure)"]);
    }

    #[test]
    fn test_duplicate_pre_aggregation_names() {
        let diags = diagnostics(
            r#"
cubes:
  - name: Orders
    sql: SELECT 1
    measures:
      - name: count
        type: count
    pre_aggregations:
      - name: main
        measures: [count]
      - name: main
        measures: [count]
"#,
        );
        assert_eq!(diags.messages(), vec!["Pre-aggregation Orders.main is defined more than once"]);
    }

    #[test]
    fn test_cross_cube_reference_resolution() {
        let yaml = r#"
cubes:
  - name: Orders
    sql: SELECT 1
    joins:
      - name: Users
        sql: "{CUBE}.user_id = {Users}.id"
        relationship: belongs_to
    measures:
      - name: count
        type: count
    pre_aggregations:
      - name: by_user
        measures: [CUBE.count]
        dimensions: [Users.city]
  - name: Users
    sql: SELECT 2
    dimensions:
      - name: city
        sql: city
        type: string
"#;
        let schema = compile_str(yaml).unwrap();
        let pre_agg = schema.cube("Orders").unwrap().pre_aggregation("by_user").unwrap();
        assert_eq!(pre_agg.dimensions[0].qualified("Orders"), "Users.city");
        assert_eq!(pre_agg.measures[0].qualified("Orders"), "Orders.count");

        let broken = yaml.replace("[Users.city]", "[Users.town]");
        let diags = diagnostics(&broken);
        assert_eq!(
            diags.messages(),
            vec!["Orders cube: pre-aggregation by_user references unknown dimension 'Users.town'"]
        );
    }

    #[test]
    fn test_unknown_reference_suggestion() {
        let diags = diagnostics(
            r#"
cubes:
  - name: Orders
    sql: SELECT 1
    measures:
      - name: total_amount
        sql: amount
        type: sum
    pre_aggregations:
      - name: main
        measures: [total_amt]
"#,
        );
        assert_eq!(
            diags.messages(),
            vec!["Orders cube: pre-aggregation main references unknown measure 'Orders.total_amt'; did you mean 'total_amount'?"]
        );
    }

    #[test]
    fn test_unknown_cube_and_join_target() {
        let diags = diagnostics(
            r#"
cubes:
  - name: Orders
    sql: SELECT 1
    joins:
      - name: Customers
        sql: "{CUBE}.customer_id = {Customers}.id"
        relationship: many_to_one
    pre_aggregations:
      - name: main
        dimensions: [Customers.city]
"#,
        );
        assert_eq!(
            diags.messages(),
            vec![
                "Orders cube: pre-aggregation main references unknown cube 'Customers'",
                "Orders cube: join references unknown cube 'Customers'",
            ]
        );
    }

    #[test]
    fn test_granularity_vocabulary() {
        let yaml = r#"
cubes:
  - name: Orders
    sql: SELECT 1
    dimensions:
      - name: created_at
        sql: created_at
        type: time
      - name: status
        sql: status
        type: string
    pre_aggregations:
      - name: main
        time_dimensions:
          - dimension: created_at
            granularity: fortnight
          - dimension: status
            granularity: day
        partition_granularity: month
"#;
        let diags = diagnostics(yaml);
        assert_eq!(
            diags.messages(),
            vec![
                "Orders cube: pre-aggregation main uses 'Orders.status' as a time dimension but its type is string",
                "Orders cube: (granularity = fortnight) must be one of [second, minute, hour, day, week, month, quarter, year]",
            ]
        );

        let mut config = CompilerConfig::default();
        config.granularity.allowed.push("fortnight".to_string());
        let fixed = yaml.replace("dimension: status", "dimension: created_at");
        let schema = SchemaCompiler::with_config(config).compile_str(&fixed).unwrap();
        assert_eq!(schema.cube("Orders").unwrap().pre_aggregations[0].time_dimensions.len(), 2);
    }

    #[test]
    fn test_repeated_time_dimension_granularity() {
        let yaml = r#"
cubes:
  - name: Orders
    sql: SELECT 1
    dimensions:
      - name: created_at
        sql: created_at
        type: time
    pre_aggregations:
      - name: main
        time_dimensions:
          - dimension: created_at
            granularity: day
          - dimension: CUBE.created_at
            granularity: day
"#;
        let diags = diagnostics(yaml);
        assert_eq!(
            diags.messages(),
            vec!["Orders cube: pre-aggregation main lists time dimension created_at with granularity day more than once"]
        );
        assert_eq!(diags.all()[0].code, DiagnosticCode::Semantic);

        let schema = compile_str(&yaml.replacen("granularity: day", "granularity: month", 1)).unwrap();
        let pre_agg = schema.cube("Orders").unwrap().pre_aggregation("main").unwrap();
        assert_eq!(pre_agg.time_dimensions.len(), 2);
        assert_eq!(pre_agg.time_dimensions[0].granularity, "month");
    }

    #[test]
    fn test_partition_needs_time_dimension() {
        let diags = diagnostics(
            "cubes:\n  - name: Orders\n    sql: SELECT 1\n    pre_aggregations:\n      - name: main\n        partition_granularity: day\n",
        );
        assert_eq!(
            diags.messages(),
            vec!["Orders cube: pre-aggregation main sets partition_granularity without a time dimension"]
        );
    }

    #[test]
    fn test_compile_documents_prefixes_locations() {
        let documents = [
            ("orders.yml", "cubes:\n  - name: Orders\n    sql: SELECT 1\n"),
            ("users.yml", "cubes:\n  - name: Orders\n    title: null\n    sql: SELECT 2\n"),
        ];
        let err = SchemaCompiler::new().compile_documents(&documents).unwrap_err();
        let diags = err.diagnostics().unwrap();
        assert_eq!(diags.len(), 2);
        assert_eq!(diags.all()[0].message, "Orders cube: (title = null) must be a string");
        assert_eq!(diags.all()[0].location.to_string(), "users.yml:cubes[0].title");
        assert_eq!(diags.all()[1].code, DiagnosticCode::DuplicateName);
    }

    #[test]
    fn test_compile_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.yml"), "cubes:\n  - name: B\n    sql: SELECT 2\n").unwrap();
        fs::write(dir.path().join("nested/a.yaml"), "cubes:\n  - name: A\n    sql: SELECT 1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a model").unwrap();

        let schema = SchemaCompiler::new().compile_dir(dir.path()).unwrap();
        let names: Vec<_> = schema.cubes().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);

        let missing = SchemaCompiler::new().compile_dir(dir.path().join("missing"));
        assert!(matches!(missing, Err(SchemaError::Read { .. })));
    }

    #[test]
    fn test_load_sources_keeps_names_distinct() {
        let east = tempfile::tempdir().unwrap();
        let west = tempfile::tempdir().unwrap();
        fs::write(east.path().join("orders.yml"), "cubes:\n  - name: East\n    sql: SELECT 1\n").unwrap();
        fs::write(west.path().join("orders.yml"), "cubes:\n  - name: West\n    title: null\n    sql: SELECT 2\n").unwrap();

        let single = load_sources(&[east.path()]).unwrap();
        assert_eq!(single[0].0, "orders.yml");

        let documents = load_sources(&[east.path(), west.path()]).unwrap();
        assert_eq!(documents.len(), 2);
        assert_ne!(documents[0].0, documents[1].0);
        assert_eq!(documents[1].0, west.path().join("orders.yml").display().to_string());

        let err = SchemaCompiler::new().compile_documents(&documents).unwrap_err();
        let diags = err.diagnostics().unwrap();
        assert_eq!(
            diags.all()[0].location.to_string(),
            format!("{}:cubes[0].title", west.path().join("orders.yml").display())
        );
    }

    #[test]
    fn test_idempotent_compilation() {
        let yaml = "cubes:\n  - name: Orders\n    sql: SELECT 1\n    measures:\n      - name: count\n        type: count\n";
        let first = compile_str(yaml).unwrap();
        let second = compile_str(yaml).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());

        let changed = compile_str(&yaml.replace("SELECT 1", "SELECT 2")).unwrap();
        assert_ne!(first.fingerprint(), changed.fingerprint());
    }
}
