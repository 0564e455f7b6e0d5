//! Lazy two-pass document validation
//!
//! [`DocumentValidation`] consumes its inputs one at a time. Directory inputs
//! are expanded one level per step into the same queue. Documents failing
//! pass 1 are yielded right away; documents passing it are held until every
//! input has been consumed, then pass 2 runs once and the held documents are
//! yielded with whatever cross-document errors belong to them.
//!
//! The sequence is finite and single-pass. Dropping it before the end means
//! pass 2 never ran for the held documents.

use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::iter::FusedIterator;
use std::path::PathBuf;
use tracing::{error, info};

use crate::engine::{ExtensibleValidator, FirstPass, ValidateOptions};
use crate::error::{ErrorReason, ReportError};
use crate::loader::{parse_text, read_directory_level};
use crate::schema::{DocumentReport, DocumentSource, ValidationStats};

#[derive(Debug)]
enum Pending {
    Path(PathBuf),
    Inline { file: Option<String>, json: Option<Value> },
    Parsed { file: String, json: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    FirstPass,
    Done,
}

/// Reports of one validation run, in yield order
pub struct DocumentValidation<'a> {
    engine: &'a mut ExtensibleValidator,
    options: ValidateOptions,
    pending: VecDeque<Pending>,
    held: Vec<DocumentReport>,
    ready: VecDeque<DocumentReport>,
    phase: Phase,
    inline_count: usize,
    stats: ValidationStats,
}

impl<'a> DocumentValidation<'a> {
    pub(crate) fn new(
        engine: &'a mut ExtensibleValidator,
        sources: Vec<DocumentSource>,
        options: ValidateOptions,
    ) -> Self {
        let pending = sources
            .into_iter()
            .map(|source| match source {
                DocumentSource::Path(path) => Pending::Path(path),
                DocumentSource::Record(record) => Pending::Inline {
                    file: record.file,
                    json: record.json,
                },
            })
            .collect();
        Self {
            engine,
            options,
            pending,
            held: Vec::new(),
            ready: VecDeque::new(),
            phase: Phase::FirstPass,
            inline_count: 0,
            stats: ValidationStats::default(),
        }
    }

    /// Counters so far; final once the iterator is exhausted
    pub fn stats(&self) -> ValidationStats {
        self.stats
    }

    fn fatal(&mut self, file: String, description: String) -> DocumentReport {
        error!("{}: {}", file, description);
        self.stats.processed += 1;
        self.stats.failed += 1;
        DocumentReport::new(file).with_error(ReportError::new(ErrorReason::Fatal, description))
    }

    /// Advance the queue by one item; returns a report when one is ready
    fn process(&mut self, item: Pending) -> Option<DocumentReport> {
        match item {
            Pending::Path(path) if path.is_dir() => match read_directory_level(&path) {
                Ok(entries) => {
                    self.pending.extend(entries.into_iter().map(Pending::Path));
                    None
                }
                Err(e) => {
                    let file = path.display().to_string();
                    Some(self.fatal(file, format!("Unable to open/process JSON directory: {e}")))
                }
            },
            Pending::Path(path) => {
                let file = path.display().to_string();
                let content = match fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => return Some(self.fatal(file, format!("Unable to open/read file: {e}"))),
                };
                match parse_text(&content) {
                    Ok(json) => self.admit(file, json),
                    Err(reason) => Some(self.fatal(file, format!("Unable to parse file: {reason}"))),
                }
            }
            Pending::Inline { file, json } => {
                let file = file.unwrap_or_else(|| {
                    self.inline_count += 1;
                    format!("(inline document {})", self.inline_count)
                });
                match json {
                    Some(json) => self.admit(file, json),
                    None => {
                        self.stats.processed += 1;
                        Some(DocumentReport::new(file).with_error(ReportError::new(
                            ErrorReason::Ignored,
                            "No JSON content to validate",
                        )))
                    }
                }
            }
            Pending::Parsed { file, json } => self.first_pass(file, json),
        }
    }

    fn admit(&mut self, file: String, json: Value) -> Option<DocumentReport> {
        match json {
            Value::Array(items) if self.options.iterate_arrays => {
                for (i, item) in items.into_iter().enumerate().rev() {
                    self.pending.push_front(Pending::Parsed {
                        file: format!("{file}[{i}]"),
                        json: item,
                    });
                }
                None
            }
            json => self.first_pass(file, json),
        }
    }

    fn first_pass(&mut self, file: String, json: Value) -> Option<DocumentReport> {
        self.stats.processed += 1;
        match self.engine.first_pass(file, json, &self.options) {
            FirstPass::Failed(report) => {
                self.stats.failed += 1;
                Some(report)
            }
            FirstPass::Held(report) => {
                self.stats.held += 1;
                self.held.push(report);
                None
            }
        }
    }

    /// Pass 2 over the held documents, then per-run cleanup
    fn finish(&mut self) {
        let errors = self.engine.second_pass();
        // Documents sharing a file name share its pass-2 errors
        for mut report in self.held.drain(..) {
            match errors.get(&report.file) {
                Some(found) if !found.is_empty() => {
                    report.errors.extend(found.iter().cloned());
                    self.stats.second_pass_failed += 1;
                    self.stats.failed += 1;
                }
                _ => self.stats.passed += 1,
            }
            self.ready.push_back(report);
        }
        self.engine.cleanup();
        info!("Document validation: {}", self.stats);
    }
}

impl Iterator for DocumentValidation<'_> {
    type Item = DocumentReport;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(report) = self.ready.pop_front() {
                return Some(report);
            }
            if self.phase == Phase::Done {
                return None;
            }
            match self.pending.pop_front() {
                Some(item) => {
                    if let Some(report) = self.process(item) {
                        return Some(report);
                    }
                }
                None => {
                    self.finish();
                    self.phase = Phase::Done;
                }
            }
        }
    }
}

impl FusedIterator for DocumentValidation<'_> {}

impl std::fmt::Debug for DocumentValidation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentValidation")
            .field("pending", &self.pending.len())
            .field("held", &self.held.len())
            .field("phase", &self.phase)
            .field("stats", &self.stats)
            .finish()
    }
}
