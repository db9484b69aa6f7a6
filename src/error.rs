//! Error types for the schema compiler

use thiserror::Error;

use crate::diagnostics::Diagnostics;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Compiler errors that are not model diagnostics
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("Compilation failed:\n{0}")]
    Compilation(Diagnostics),
}

impl From<Diagnostics> for SchemaError {
    fn from(diagnostics: Diagnostics) -> Self {
        SchemaError::Compilation(diagnostics)
    }
}

impl SchemaError {
    /// Diagnostics carried by a failed compilation, if this is one
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            SchemaError::Compilation(diagnostics) => Some(diagnostics),
            _ => None,
        }
    }
}
