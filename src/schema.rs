//! Schema and document records
//!
//! [`SchemaRecord`] is what the loader keeps for every accepted schema;
//! [`DocumentReport`] is what validation yields for every document.

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::checksum::ContentHash;
use crate::compiler::DraftVersion;
use crate::error::ReportError;
use crate::extensions::Extension;

/// A loaded schema
pub struct SchemaRecord {
    /// File path or synthetic label it was loaded from
    pub source: String,
    pub schema: Arc<Value>,
    pub content_hash: ContentHash,
    pub uri: String,
    pub draft: DraftVersion,
    /// The URI was generated because the schema has no id
    pub anonymous: bool,
    /// Loading and compilation errors
    pub errors: Vec<ReportError>,
    /// Errors of the last extension bootstrap, recomputed on every load
    pub bootstrap_errors: Vec<ReportError>,
    pub validator: Option<Arc<JSONSchema>>,
    pub extensions: Vec<Extension>,
    /// Schema with every `$ref` inlined, filled on demand
    pub resolved_schema: Option<Value>,
}

impl SchemaRecord {
    /// Compiled and bootstrapped without errors
    pub fn is_consistent(&self) -> bool {
        self.validator.is_some() && self.errors.is_empty() && self.bootstrap_errors.is_empty()
    }

    pub fn all_errors(&self) -> impl Iterator<Item = &ReportError> {
        self.errors.iter().chain(self.bootstrap_errors.iter())
    }
}

impl fmt::Debug for SchemaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRecord")
            .field("source", &self.source)
            .field("uri", &self.uri)
            .field("draft", &self.draft)
            .field("content_hash", &self.content_hash)
            .field("anonymous", &self.anonymous)
            .field("errors", &self.errors)
            .field("bootstrap_errors", &self.bootstrap_errors)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// A schema that never made it into the loaded set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedSchema {
    pub source: String,
    pub errors: Vec<ReportError>,
}

/// An already parsed schema handed to the loader
#[derive(Debug, Clone)]
pub struct InlineSchema {
    pub label: Option<String>,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub enum SchemaSource {
    Path(PathBuf),
    Record(InlineSchema),
}

impl From<PathBuf> for SchemaSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Value> for SchemaSource {
    fn from(schema: Value) -> Self {
        Self::Record(InlineSchema { label: None, schema })
    }
}

/// An in-memory document; a record without `json` is ignored
#[derive(Debug, Clone, Default)]
pub struct InlineDocument {
    pub file: Option<String>,
    pub json: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Record(InlineDocument),
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl DocumentSource {
    /// In-memory document identified by `file`
    pub fn json(file: impl Into<String>, json: Value) -> Self {
        Self::Record(InlineDocument {
            file: Some(file.into()),
            json: Some(json),
        })
    }
}

/// Validation outcome of one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub file: String,
    #[serde(skip)]
    pub json: Option<Value>,
    pub schema_id: Option<String>,
    pub schema_hash: Option<String>,
    pub errors: Vec<ReportError>,
}

impl DocumentReport {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            json: None,
            schema_id: None,
            schema_hash: None,
            errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: ReportError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub files_ok: usize,
    pub files_ignored: usize,
    pub files_failed: usize,
    pub dirs_ok: usize,
    pub dirs_failed: usize,
    pub schemas_consistent: usize,
    pub schemas_inconsistent: usize,
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files ok {}, ignored {}, failed {}; dirs ok {}, failed {}; schemas consistent {}, inconsistent {}",
            self.files_ok,
            self.files_ignored,
            self.files_failed,
            self.dirs_ok,
            self.dirs_failed,
            self.schemas_consistent,
            self.schemas_inconsistent
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub processed: usize,
    pub passed: usize,
    pub failed: usize,
    /// Held back after pass 1
    pub held: usize,
    /// Held documents that failed pass 2
    pub second_pass_failed: usize,
}

impl fmt::Display for ValidationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, passed {}, failed {} (held {}, failed in second pass {})",
            self.processed, self.passed, self.failed, self.held, self.second_pass_failed
        )
    }
}
