//! Extended JSON Schema validator
//!
//! Validates collections of JSON (or YAML) documents against JSON Schema
//! drafts 4, 6 and 7, plus relational keywords that span documents:
//!
//! - **`index`**: named key sets other documents may join against
//! - **`unique`**: no two values may share a key
//! - **`primary_key`**: unique keys, optionally seeded by external providers
//! - **`foreign_keys`**: values must exist as a primary key of another schema
//! - **`join_keys`**: values must exist in an index of another schema
//!
//! The schema set itself is checked too: every schema against its augmented
//! meta-schema, ids for duplicates, and `$ref` graphs for cycles.
//!
//! ## Architecture
//!
//! ```text
//! load_schemas ──> loader ──> compiler (meta-check) ──> graph::traverse
//!                                                          │
//!                     extensions::bootstrap <── propagate <─┘
//!
//! validate_documents ──> pass 1: compiled validator + walker + extensions
//!                    └─> pass 2: contexts ──> do_second_pass ──> reports
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use extended_json_validator::{
//!     DocumentSource, ExtensibleValidator, SchemaSource, ValidateOptions, ValidatorConfig,
//! };
//!
//! let mut validator = ExtensibleValidator::new(ValidatorConfig::load()?)?;
//! validator.load_schemas(&[SchemaSource::Path("schemas".into())])?;
//! for report in validator.validate_documents(vec![DocumentSource::Path("data".into())], ValidateOptions::default())? {
//!     for error in &report.errors {
//!         println!("{}: {}", report.file, error);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checksum;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod graph;
pub mod key_path;
pub mod loader;
pub mod schema;
pub mod uri;
pub mod validation;
pub mod walker;

pub use checksum::ContentHash;
pub use compiler::DraftVersion;
pub use config::{MalformedKeywordPolicy, PrimaryKeyConfig, ValidatorConfig};
pub use engine::{ExtensibleValidator, GuessMode, ValidateOptions};
pub use error::{ErrorReason, ReportError, Result, ValidatorError};
pub use extensions::{ExtensionKind, FeatureValidator};
pub use schema::{
    DocumentReport, DocumentSource, InlineDocument, InlineSchema, LoadStats, RejectedSchema, SchemaRecord,
    SchemaSource, ValidationStats,
};
pub use validation::DocumentValidation;
