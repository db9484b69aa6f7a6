//! Configuration management for the schema compiler
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (cube-schema.toml)
//! - Environment variables (CUBE_SCHEMA__*)
//!
//! ## Example config file (cube-schema.toml):
//! ```toml
//! [granularity]
//! allowed = ["hour", "day", "week", "month", "quarter", "year"]
//!
//! [coercion]
//! empty_string_as_null = false
//! strict_identifiers = true
//!
//! [output]
//! format = "pretty"
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Main configuration for the compiler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Time bucketing vocabulary
    #[serde(default)]
    pub granularity: GranularityConfig,

    /// Field coercion rules
    #[serde(default)]
    pub coercion: CoercionConfig,

    /// CLI output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Granularities accepted in time dimension references and partitioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GranularityConfig {
    #[serde(default = "default_granularities")]
    pub allowed: Vec<String>,
}

/// Field coercion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoercionConfig {
    /// Treat `''` in string fields as an explicit null
    #[serde(default)]
    pub empty_string_as_null: bool,

    /// Require entity names to look like identifiers
    #[serde(default = "default_true")]
    pub strict_identifiers: bool,
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_granularities() -> Vec<String> {
    ["second", "minute", "hour", "day", "week", "month", "quarter", "year"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for GranularityConfig {
    fn default() -> Self {
        Self {
            allowed: default_granularities(),
        }
    }
}

impl Default for CoercionConfig {
    fn default() -> Self {
        Self {
            empty_string_as_null: false,
            strict_identifiers: true,
        }
    }
}

impl GranularityConfig {
    pub fn is_allowed(&self, granularity: &str) -> bool {
        self.allowed.iter().any(|g| g == granularity)
    }
}

impl CompilerConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, adding a required file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_locations = [
            "cube-schema.toml",
            ".cube-schema.toml",
            "config/cube-schema.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "cube", "cube-schema") {
            let xdg_config = config_dir.config_dir().join("cube-schema.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("CUBE_SCHEMA")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("granularity.allowed"),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert!(config.granularity.is_allowed("day"));
        assert!(!config.granularity.is_allowed("fortnight"));
        assert!(!config.coercion.empty_string_as_null);
        assert!(config.coercion.strict_identifiers);
        assert_eq!(config.output.format, OutputFormat::Pretty);
    }

    #[test]
    fn test_serialize_config() {
        let config = CompilerConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[granularity]"));
        assert!(toml_str.contains("[coercion]"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compiler.toml");
        std::fs::write(
            &path,
            "[granularity]\nallowed = [\"day\", \"month\"]\n\n[coercion]\nempty_string_as_null = true\n",
        )
        .unwrap();

        let config = CompilerConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.granularity.allowed, vec!["day", "month"]);
        assert!(config.coercion.empty_string_as_null);
        assert!(config.coercion.strict_identifiers);
    }

    #[test]
    fn test_save_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = CompilerConfig::default();
        config.output.format = OutputFormat::Compact;
        config.save(&path).unwrap();

        let loaded = CompilerConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.output.format, OutputFormat::Compact);
    }

    #[test]
    fn test_config_errors_are_schema_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            CompilerConfig::load_from(Some(&missing)),
            Err(crate::SchemaError::Config(_))
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[granularity]\nallowed = 5\n").unwrap();
        assert!(matches!(
            CompilerConfig::load_from(Some(&bad)),
            Err(crate::SchemaError::Config(_))
        ));

        let unwritable = dir.path().join("no-such-dir").join("out.toml");
        assert!(matches!(
            CompilerConfig::default().save(&unwritable),
            Err(crate::SchemaError::Io(_))
        ));
    }
}
