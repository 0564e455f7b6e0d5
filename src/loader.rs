//! Schema loading
//!
//! Turns files, directories and in-memory records into schema candidates:
//! parses them (JSON first, YAML as fallback), detects the draft, and assigns
//! the URI every later stage keys on.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksum::ContentHash;
use crate::compiler::DraftVersion;
use crate::error::{ErrorReason, ReportError};
use crate::schema::{LoadStats, RejectedSchema, SchemaRecord, SchemaSource};
use crate::uri::defrag;

const SCHEMA_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

const ANONYMOUS_PREFIX: &str = "urn:ejsv:anonymous-schema:";

/// A parsed schema, before identification
#[derive(Debug, Clone)]
pub struct ParsedSchema {
    pub source: String,
    pub schema: Value,
}

/// A schema that passed identification and is ready to compile
#[derive(Debug, Clone)]
pub struct SchemaCandidate {
    pub source: String,
    pub schema: Arc<Value>,
    pub content_hash: ContentHash,
    pub uri: String,
    pub draft: DraftVersion,
    pub anonymous: bool,
}

/// Parse text as JSON, falling back to YAML
pub fn parse_text(content: &str) -> Result<Value, String> {
    match serde_json::from_str(content) {
        Ok(value) => Ok(value),
        Err(json_error) => serde_yaml::from_str::<Value>(content)
            .map_err(|yaml_error| format!("not JSON ({json_error}) nor YAML ({yaml_error})")),
    }
}

/// Read and parse one file
pub fn parse_file(path: &Path) -> Result<Value, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("unable to read: {e}"))?;
    parse_text(&content)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.starts_with('.'))
}

fn has_schema_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| SCHEMA_EXTENSIONS.contains(&ext))
}

/// Entries of one directory level worth visiting for documents
///
/// Dotfiles are skipped; subdirectories are kept, files only when their name
/// mentions `.json`, `.yaml` or `.yml`.
pub fn read_directory_level(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_hidden(&path) {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if path.is_dir() || [".json", ".yaml", ".yml"].iter().any(|ext| name.contains(ext)) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Stateful loader; keeps counters alive across repeated loads
#[derive(Debug, Default)]
pub struct SchemaLoader {
    inline_count: usize,
    anonymous_count: usize,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every source; directories are expanded recursively
    pub fn collect(
        &mut self,
        sources: &[SchemaSource],
        stats: &mut LoadStats,
        rejected: &mut Vec<RejectedSchema>,
    ) -> Vec<ParsedSchema> {
        let mut parsed = Vec::new();
        for source in sources {
            match source {
                SchemaSource::Record(record) => {
                    self.inline_count += 1;
                    let label = record
                        .label
                        .clone()
                        .unwrap_or_else(|| format!("(inline schema {})", self.inline_count));
                    parsed.push(ParsedSchema {
                        source: label,
                        schema: record.schema.clone(),
                    });
                }
                SchemaSource::Path(path) if path.is_dir() => {
                    self.collect_directory(path, stats, rejected, &mut parsed);
                }
                SchemaSource::Path(path) => {
                    Self::collect_file(path, stats, rejected, &mut parsed);
                }
            }
        }
        parsed
    }

    fn collect_directory(
        &self,
        dir: &Path,
        stats: &mut LoadStats,
        rejected: &mut Vec<RejectedSchema>,
        parsed: &mut Vec<ParsedSchema>,
    ) {
        let mut failed = false;
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Unable to read directory entry under {}: {}", dir.display(), e);
                    failed = true;
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && has_schema_extension(path) {
                Self::collect_file(path, stats, rejected, parsed);
            }
        }
        if failed {
            stats.dirs_failed += 1;
        } else {
            stats.dirs_ok += 1;
        }
    }

    fn collect_file(
        path: &Path,
        stats: &mut LoadStats,
        rejected: &mut Vec<RejectedSchema>,
        parsed: &mut Vec<ParsedSchema>,
    ) {
        let source = path.display().to_string();
        match parse_file(path) {
            Ok(schema) => parsed.push(ParsedSchema { source, schema }),
            Err(reason) => {
                warn!("Unable to load schema {}: {}", source, reason);
                stats.files_failed += 1;
                rejected.push(RejectedSchema {
                    errors: vec![ReportError::new(
                        ErrorReason::Fatal,
                        format!("Unable to load {source}: {reason}"),
                    )],
                    source,
                });
            }
        }
    }

    /// Detect draft and URI; rejects unknown drafts, missing ids and duplicates
    pub fn identify(
        &mut self,
        parsed: ParsedSchema,
        validate_no_id: bool,
        loaded: &BTreeMap<String, SchemaRecord>,
        stats: &mut LoadStats,
    ) -> Result<SchemaCandidate, RejectedSchema> {
        let reject = |reason: ErrorReason, description: String| RejectedSchema {
            source: parsed.source.clone(),
            errors: vec![ReportError::new(reason, description)],
        };

        let draft = match parsed.schema.get("$schema") {
            None => {
                stats.files_ignored += 1;
                return Err(reject(
                    ErrorReason::NoSchema,
                    format!("{} does not declare $schema", parsed.source),
                ));
            }
            Some(declared) => match declared.as_str().and_then(DraftVersion::from_schema_uri) {
                Some(draft) => draft,
                None => {
                    stats.files_ignored += 1;
                    return Err(reject(
                        ErrorReason::SchemaUnknown,
                        format!("{} declares an unsupported $schema {}", parsed.source, declared),
                    ));
                }
            },
        };

        let declared_id = [draft.id_keyword(), "$id", "id"]
            .iter()
            .find_map(|keyword| parsed.schema.get(*keyword).and_then(Value::as_str))
            .map(|id| defrag(id).0)
            .filter(|id| !id.is_empty());

        let (uri, anonymous) = match declared_id {
            Some(id) => (id, false),
            None if validate_no_id => {
                stats.files_failed += 1;
                return Err(reject(
                    ErrorReason::NoId,
                    format!("{} has no id and anonymous schemas are not allowed", parsed.source),
                ));
            }
            None => {
                self.anonymous_count += 1;
                (format!("{ANONYMOUS_PREFIX}{}", self.anonymous_count), true)
            }
        };

        if let Some(existing) = loaded.get(&uri) {
            stats.files_failed += 1;
            return Err(RejectedSchema {
                errors: vec![ReportError::new(
                    ErrorReason::DupId,
                    format!("{} has the same id {} as {}", parsed.source, uri, existing.source),
                )
                .with_schema_id(uri.clone())],
                source: parsed.source,
            });
        }

        debug!("Identified {} as {} ({})", parsed.source, uri, draft);
        stats.files_ok += 1;
        Ok(SchemaCandidate {
            content_hash: ContentHash::from_json(&parsed.schema),
            source: parsed.source,
            schema: Arc::new(parsed.schema),
            uri,
            draft,
            anonymous,
        })
    }
}
