//! Cube Schema Compiler
//!
//! Compiles YAML data-model documents describing analytical cubes into a
//! strict canonical schema, and projects that schema into the metadata view
//! served to API consumers.
//!
//! ## Pipeline
//!
//! ```text
//! text ──parse──▶ GenericNode ──shape──▶ cube bodies ──transpile──▶ CubeEntity
//!                                                                     │
//!                        MetadataView ◀──project── CompiledSchema ◀───┤ pre-aggregation
//!                                                                     │ validation and
//!                                                                     │ schema-wide passes
//! ```
//!
//! Every stage reports problems into one ordered [`Diagnostics`] list instead
//! of stopping at the first, so a single compilation surfaces every error in
//! a document. Compilation succeeds only when that list is empty.
//!
//! ## Example
//!
//! ```
//! use cube_schema_compiler::compile_str;
//!
//! let schema = compile_str(r#"
//! cubes:
//!   - name: Orders
//!     sql_table: orders
//!     measures:
//!       - name: count
//!         type: count
//!         description: Number of orders
//! "#).unwrap();
//!
//! let view = schema.metadata_view();
//! assert_eq!(
//!     view.member("Orders.count").unwrap().description.as_deref(),
//!     Some("Number of orders"),
//! );
//! ```

pub mod checksum;
pub mod coerce;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod meta;
pub mod model;
pub mod node;
pub mod preagg;
pub mod shape;
pub mod transpile;

pub use checksum::Checksum;
pub use compiler::{compile, compile_str, CompiledSchema, SchemaCompiler};
pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticPath, Diagnostics};
pub use error::{Result, SchemaError};
pub use meta::{CubeMeta, MemberMeta, MetadataView};
pub use model::{CubeEntity, EntityKind, MetaBag};
pub use node::{parse, GenericNode, Location, NodeKind};
