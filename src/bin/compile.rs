//! Cube Schema CLI
//!
//! Compiles model files and directories into one schema and prints either a
//! summary or the metadata view as JSON.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cube_schema_compiler::compiler::load_sources;
use cube_schema_compiler::config::OutputFormat;
use cube_schema_compiler::{CompilerConfig, SchemaCompiler, SchemaError};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cube-schema")]
#[command(about = "Compile and validate cube data-model documents")]
struct Cli {
    /// Config file layered over the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the metadata view instead of a summary
    #[arg(long)]
    meta: bool,

    /// Compact JSON output
    #[arg(long)]
    compact: bool,

    /// Model files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    documents: usize,
    cubes: Vec<CubeSummary>,
    fingerprint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CubeSummary {
    name: String,
    dimensions: usize,
    measures: usize,
    segments: usize,
    joins: usize,
    pre_aggregations: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<SchemaError>().and_then(SchemaError::diagnostics) {
            Some(diagnostics) => eprint!("{}", diagnostics.format_all()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = CompilerConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if cli.compact {
        config.output.format = OutputFormat::Compact;
    }

    let documents = load_sources(&cli.paths)?;

    let compiler = SchemaCompiler::with_config(config);
    let schema = compiler.compile_documents(&documents)?;

    let output = if cli.meta {
        render(&schema.metadata_view(), compiler.config().output.format)?
    } else {
        let summary = Summary {
            documents: documents.len(),
            cubes: schema
                .cubes()
                .iter()
                .map(|cube| CubeSummary {
                    name: cube.name.clone(),
                    dimensions: cube.dimensions.len(),
                    measures: cube.measures.len(),
                    segments: cube.segments.len(),
                    joins: cube.joins.len(),
                    pre_aggregations: cube.pre_aggregations.len(),
                })
                .collect(),
            fingerprint: schema.fingerprint().to_string(),
        };
        render(&summary, compiler.config().output.format)?
    };

    println!("{}", output);
    Ok(())
}

fn render<T: Serialize>(value: &T, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Pretty => serde_json::to_string_pretty(value),
        OutputFormat::Compact => serde_json::to_string(value),
    }
}
