//! Error types for the extended validator
//!
//! Two families live here:
//!
//! - [`ValidatorError`]: unrecoverable conditions (registration conflicts,
//!   configuration problems, a run without schemas). These abort the call.
//! - [`ReportError`]: recoverable findings attached to schemas and documents.
//!   They are data, carried inside reports, never raised.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for validator operations
pub type Result<T> = std::result::Result<T, ValidatorError>;

/// Fatal validator errors
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Two extensions are using the same triggering attribute: {0}")]
    DuplicateTrigger(String),

    #[error("No schema was successfully loaded, document validation cannot start")]
    NoSchemasLoaded,

    #[error("Unable to compile the meta-schema for {draft}: {reason}")]
    MetaSchema { draft: String, reason: String },

    #[error("Invalid syntax fragment for extension keyword '{keyword}': {reason}")]
    ExtensionFragment { keyword: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Machine-readable code of a recoverable error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    NoSchema,
    SchemaUnknown,
    DupId,
    SchemaError,
    NoId,
    FkNoSchema,
    DanglingFk,
    DanglingJk,
    StaleFk,
    StaleJk,
    DupPk,
    DupUnique,
    ErrIndex,
    Fatal,
    Ignored,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSchema => "no_schema",
            Self::SchemaUnknown => "schema_unknown",
            Self::DupId => "dup_id",
            Self::SchemaError => "schema_error",
            Self::NoId => "no_id",
            Self::FkNoSchema => "fk_no_schema",
            Self::DanglingFk => "dangling_fk",
            Self::DanglingJk => "dangling_jk",
            Self::StaleFk => "stale_fk",
            Self::StaleJk => "stale_jk",
            Self::DupPk => "dup_pk",
            Self::DupUnique => "dup_unique",
            Self::ErrIndex => "err_index",
            Self::Fatal => "fatal",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured, recoverable error attached to a schema or a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportError {
    pub reason: ErrorReason,
    pub description: String,
    /// JSON Pointer of the offending value, when the error is structural
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
}

impl ReportError {
    pub fn new(reason: ErrorReason, description: impl Into<String>) -> Self {
        Self {
            reason,
            description: description.into(),
            path: None,
            schema_id: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[{}] {} (at {})", self.reason, self.description, path),
            None => write!(f, "[{}] {}", self.reason, self.description),
        }
    }
}
