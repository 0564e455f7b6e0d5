//! Configuration management for the validator
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (ejsv.toml / ejsv.yaml)
//! - Environment variables (EJSV__*)
//!
//! ## Example config file (ejsv.toml):
//! ```toml
//! cache_dir = "/var/cache/ejsv"
//! validate_no_id = true
//! malformed_keywords = "discard"
//! schema_key_paths = ["$schema", "@schema", "_schema"]
//!
//! [primary_key]
//! schema_prefix = "https://w3id.org/example/"
//! accept = "text/plain"
//! provider = ["https://ids.example.org/"]
//! allow_provider_duplicates = false
//!
//! [primary_key.inline_provider]
//! "people.json" = ["p-1", "p-2"]
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::extensions::ExtensionKind;

/// Main configuration for the validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Root of the cache directory (per-extension subdirectories live below)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Never write nor delete anything below the cache directory
    #[serde(default)]
    pub read_only_cache: bool,

    /// Reject schemas without `$id`/`id` instead of assigning an anonymous URI
    #[serde(default = "default_true", alias = "validate-no-id")]
    pub validate_no_id: bool,

    /// What to do with extension keywords whose value is malformed
    #[serde(default)]
    pub malformed_keywords: MalformedKeywordPolicy,

    /// Optional wrapper key holding the actual document
    #[serde(default)]
    pub json_root_tag: Option<String>,

    /// Keys tried, in order, for the URI of the governing schema
    #[serde(default = "default_schema_key_paths")]
    pub schema_key_paths: Vec<String>,

    /// Enabled extensions, by trigger keyword
    #[serde(default = "default_extensions")]
    pub extensions: Vec<ExtensionKind>,

    /// External key providers for `primary_key`
    #[serde(default)]
    pub primary_key: Option<PrimaryKeyConfig>,
}

/// Handling of malformed extension keyword occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MalformedKeywordPolicy {
    /// Drop the occurrence from the feature graph and log it
    #[default]
    Discard,
    /// Fail the schema with a `schema_error`
    Reject,
}

/// Configuration block of the `primary_key` extension
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrimaryKeyConfig {
    /// Providers only apply to schemas whose URI starts with this prefix
    #[serde(default)]
    pub schema_prefix: Option<String>,

    /// `Accept` header sent to HTTP providers
    #[serde(default)]
    pub accept: Option<String>,

    /// HTTP endpoints answering newline-delimited ids
    #[serde(default, deserialize_with = "one_or_many")]
    pub provider: Vec<String>,

    /// Literal id lists, keyed by schema URI or its last path segment
    #[serde(default)]
    pub inline_provider: BTreeMap<String, Vec<String>>,

    /// Track providers separately so that provider-vs-provider collisions only warn
    #[serde(default)]
    pub allow_provider_duplicates: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(single) => vec![single],
        OneOrMany::Many(many) => many,
    })
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_schema_key_paths() -> Vec<String> {
    vec!["$schema".to_string(), "@schema".to_string(), "_schema".to_string()]
}

fn default_extensions() -> Vec<ExtensionKind> {
    ExtensionKind::ALL.to_vec()
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            read_only_cache: false,
            validate_no_id: true,
            malformed_keywords: MalformedKeywordPolicy::default(),
            json_root_tag: None,
            schema_key_paths: default_schema_key_paths(),
            extensions: default_extensions(),
            primary_key: None,
        }
    }
}

impl ValidatorConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering a specific file (TOML or YAML) on top
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "ejsv.toml",
            "ejsv.yaml",
            ".ejsv.toml",
            "config/ejsv.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(project_dirs) = project_dirs() {
            let xdg_config = project_dirs.config_dir().join("ejsv.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Environment variables (EJSV__*)
        builder = builder.add_source(
            Environment::with_prefix("EJSV")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Root of the cache directory
    pub fn cache_root(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("cache_es.elixir.jsonValidator"))
    }

    /// Cache directory owned by one extension
    pub fn extension_cache_dir(&self, keyword: &str) -> PathBuf {
        self.cache_root().join(keyword)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("es", "elixir", "jsonValidator")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ValidatorConfig::default();
        assert!(config.validate_no_id);
        assert_eq!(config.malformed_keywords, MalformedKeywordPolicy::Discard);
        assert_eq!(config.schema_key_paths[0], "$schema");
        assert_eq!(config.extensions.len(), ExtensionKind::ALL.len());
    }

    #[test]
    fn test_serialize_config() {
        let mut config = ValidatorConfig::default();
        config.primary_key = Some(PrimaryKeyConfig {
            provider: vec!["http://ids.example.org/".to_string()],
            ..Default::default()
        });
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("validate_no_id = true"));
        assert!(toml_str.contains("[primary_key]"));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "validate-no-id: false\nmalformed_keywords: reject\nprimary_key:\n  provider: http://ids.example.org/\n  accept: text/plain\n",
        )
        .unwrap();

        let config = ValidatorConfig::load_from(path.to_str()).unwrap();
        assert!(!config.validate_no_id);
        assert_eq!(config.malformed_keywords, MalformedKeywordPolicy::Reject);
        let pk = config.primary_key.unwrap();
        assert_eq!(pk.provider, vec!["http://ids.example.org/"]);
        assert_eq!(pk.accept.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_extension_cache_dir() {
        let config = ValidatorConfig {
            cache_dir: Some(PathBuf::from("/tmp/ejsv-cache")),
            ..Default::default()
        };
        assert_eq!(
            config.extension_cache_dir("primary_key"),
            PathBuf::from("/tmp/ejsv-cache/primary_key")
        );
    }
}
