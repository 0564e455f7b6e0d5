//! The extensible validator
//!
//! [`ExtensibleValidator`] owns the loaded schema set and drives both phases:
//!
//! - `load_schemas`: load, meta-check, traverse, compile, propagate features
//!   across `$ref`, then bootstrap the extensions of every schema
//! - `validate_documents`: pass 1 per document, then pass 2 across documents
//!   (see [`DocumentValidation`])

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compiler::SchemaCompiler;
use crate::config::{MalformedKeywordPolicy, ValidatorConfig};
use crate::error::{ErrorReason, ReportError, Result, ValidatorError};
use crate::extensions::{BootstrapEnv, ExtensionRegistry, FragmentCheckers, GatheredContexts};
use crate::graph::{
    inline_references, propagate, traverse, FeatureGraph, FragmentArena, NodeId, ReferenceGraph,
};
use crate::key_path::materialize;
use crate::loader::{SchemaCandidate, SchemaLoader};
use crate::schema::{DocumentReport, DocumentSource, LoadStats, RejectedSchema, SchemaRecord, SchemaSource};
use crate::uri::defrag;
use crate::validation::DocumentValidation;
use crate::walker::SchemaWalker;

/// How documents without a usable schema hint are routed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GuessMode {
    /// No hint means `no_id`
    #[default]
    Off,
    /// Try every loaded schema
    All,
    /// Try only these schema URIs, in order
    Only(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub guess: GuessMode,
    /// Split documents whose root is an array into one document per element
    pub iterate_arrays: bool,
    /// Overrides the configured schema key paths
    pub schema_key_paths: Option<Vec<String>>,
}

/// Pass 1 verdict for one document
#[derive(Debug)]
pub(crate) enum FirstPass {
    Failed(DocumentReport),
    Held(DocumentReport),
}

pub struct ExtensibleValidator {
    config: ValidatorConfig,
    registry: ExtensionRegistry,
    checkers: FragmentCheckers,
    compiler: SchemaCompiler,
    loader: SchemaLoader,
    arena: FragmentArena,
    schemas: BTreeMap<String, SchemaRecord>,
    rejected: Vec<RejectedSchema>,
    /// resource URI -> traversal passes, accumulated over loads
    passes: BTreeMap<String, Vec<FeatureGraph>>,
    embedded: Vec<(String, String)>,
    references: ReferenceGraph,
    /// (fragment, keyword) pairs the walker may dispatch
    active_features: HashSet<(NodeId, String)>,
}

impl ExtensibleValidator {
    /// Create a validator; conflicting trigger keywords are fatal here
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        let registry = ExtensionRegistry::new(&config.extensions)?;
        let checkers = FragmentCheckers::new(&registry)?;
        let compiler = SchemaCompiler::new(registry.kinds())?;
        Ok(Self {
            config,
            registry,
            checkers,
            compiler,
            loader: SchemaLoader::new(),
            arena: FragmentArena::new(),
            schemas: BTreeMap::new(),
            rejected: Vec::new(),
            passes: BTreeMap::new(),
            embedded: Vec::new(),
            references: ReferenceGraph::default(),
            active_features: HashSet::new(),
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Load schemas into the set; may be called repeatedly
    pub fn load_schemas(&mut self, sources: &[SchemaSource]) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let parsed = self.loader.collect(sources, &mut stats, &mut self.rejected);

        let mut candidates = Vec::new();
        for schema in parsed {
            match self
                .loader
                .identify(schema, self.config.validate_no_id, &self.schemas, &mut stats)
            {
                Ok(candidate) => {
                    self.schemas.insert(candidate.uri.clone(), placeholder(&candidate));
                    candidates.push(candidate);
                }
                Err(rejected) => {
                    for error in &rejected.errors {
                        warn!("Schema {} rejected: {}", rejected.source, error);
                    }
                    self.rejected.push(rejected);
                }
            }
        }

        for candidate in &candidates {
            let mut errors = self.compiler.check_schema(&candidate.schema, candidate.draft)?;
            if errors.is_empty() {
                errors.extend(self.traverse_candidate(candidate));
            }
            if let Some(record) = self.schemas.get_mut(&candidate.uri) {
                record.errors = errors;
            }
        }

        for resource in self.arena.resources() {
            let root = if resource.base_pointer.is_empty() {
                Some(Arc::clone(&resource.document))
            } else {
                resource.root().cloned().map(Arc::new)
            };
            if let Some(root) = root {
                self.compiler.resolver().insert(&resource.uri, root);
            }
        }
        self.compiler.reset_branches();

        for candidate in &candidates {
            let Some(record) = self.schemas.get_mut(&candidate.uri) else {
                continue;
            };
            if !record.errors.is_empty() {
                continue;
            }
            match self.compiler.compile(&candidate.schema, candidate.draft) {
                Ok(validator) => record.validator = Some(Arc::new(validator)),
                Err(reason) => record.errors.push(
                    ReportError::new(ErrorReason::SchemaError, format!("Unable to compile schema: {reason}"))
                        .with_schema_id(candidate.uri.clone()),
                ),
            }
        }

        self.bootstrap();

        for record in self.schemas.values() {
            if record.is_consistent() {
                stats.schemas_consistent += 1;
            } else {
                stats.schemas_inconsistent += 1;
                for error in record.all_errors() {
                    warn!("Schema {} ({}) is inconsistent: {}", record.uri, record.source, error);
                }
            }
        }
        info!("Schema load: {}", stats);
        Ok(stats)
    }

    /// Record the feature graphs of one candidate; malformed keyword
    /// occurrences become errors under the reject policy
    fn traverse_candidate(&mut self, candidate: &SchemaCandidate) -> Vec<ReportError> {
        let triggers = self.registry.triggers();
        let checkers = &self.checkers;
        let accepts = |keyword: &str, value: &Value| checkers.accepts(keyword, value);
        let outcome = traverse(
            &candidate.schema,
            &candidate.uri,
            candidate.draft,
            &triggers,
            &accepts,
            &mut self.arena,
        );

        let mut errors = Vec::new();
        for malformed in outcome.malformed {
            match self.config.malformed_keywords {
                MalformedKeywordPolicy::Discard => debug!(
                    "Discarding malformed {} at {}#{}",
                    malformed.keyword, malformed.schema_uri, malformed.path
                ),
                MalformedKeywordPolicy::Reject => errors.push(
                    ReportError::new(
                        ErrorReason::SchemaError,
                        format!(
                            "Path: {} . Message: malformed '{}' declaration",
                            malformed.path, malformed.keyword
                        ),
                    )
                    .with_path(malformed.path)
                    .with_schema_id(malformed.schema_uri),
                ),
            }
        }
        if !errors.is_empty() {
            return errors;
        }

        for (uri, passes) in outcome.passes {
            self.passes.entry(uri).or_default().extend(passes);
        }
        self.embedded.extend(outcome.embedded);
        errors
    }

    /// Propagate features across `$ref` and bootstrap every schema anew
    fn bootstrap(&mut self) {
        let graphs: BTreeMap<String, FeatureGraph> = self
            .passes
            .iter()
            .map(|(uri, passes)| (uri.clone(), FeatureGraph::flatten(passes)))
            .collect();

        self.active_features = graphs
            .values()
            .flat_map(|graph| {
                graph.key_refs.iter().flat_map(|(keyword, locations)| {
                    locations.iter().map(move |location| (location.node, keyword.clone()))
                })
            })
            .collect();

        self.references = ReferenceGraph::build(&graphs, &self.embedded, &self.arena);
        for cycle in self.references.cycles() {
            info!("$ref cycle between schemas: {}", cycle.join(" -> "));
        }
        let merged = propagate(&graphs, &self.references);

        let loaded: BTreeSet<String> = self
            .schemas
            .keys()
            .cloned()
            .chain(graphs.keys().cloned())
            .collect();
        let empty = FeatureGraph::default();

        for record in self.schemas.values_mut() {
            record.bootstrap_errors.clear();
            record.extensions = self.registry.instantiate(&record.uri, &self.config);
            if record.validator.is_none() {
                continue;
            }
            let graph = merged.get(&record.uri).unwrap_or(&empty);
            let env = BootstrapEnv {
                arena: &self.arena,
                loaded: &loaded,
                source: &record.source,
            };
            for extension in &mut record.extensions {
                let validator = extension.as_validator_mut();
                if validator.needs_bootstrapping() && graph.contains(validator.trigger_attribute()) {
                    record.bootstrap_errors.extend(validator.bootstrap(graph, &env));
                }
            }
        }
    }

    /// Consistent schemas by URI; `resolve_refs` fills their resolved schema
    pub fn valid_document_schemas(&mut self, resolve_refs: bool) -> BTreeMap<String, &SchemaRecord> {
        if resolve_refs {
            for record in self.schemas.values_mut() {
                if record.is_consistent() && record.resolved_schema.is_none() {
                    record.resolved_schema = inline_references(&self.arena, &record.uri);
                }
            }
        }
        self.schemas
            .iter()
            .filter(|(_, record)| record.is_consistent())
            .map(|(uri, record)| (uri.clone(), record))
            .collect()
    }

    pub fn schema(&self, uri: &str) -> Option<&SchemaRecord> {
        self.schemas.get(uri)
    }

    /// Every schema kept in the set, consistent or not
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaRecord> {
        self.schemas.values()
    }

    pub fn rejected_schemas(&self) -> &[RejectedSchema] {
        &self.rejected
    }

    /// Groups of schemas referencing each other through `$ref`
    pub fn reference_cycles(&self) -> Vec<Vec<String>> {
        self.references.cycles()
    }

    pub fn invalidate_caches(&mut self) {
        for record in self.schemas.values_mut() {
            for extension in &mut record.extensions {
                extension.as_validator_mut().invalidate_caches();
            }
        }
    }

    pub fn warm_up_caches(&mut self) {
        for record in self.schemas.values_mut() {
            for extension in &mut record.extensions {
                extension.as_validator_mut().warm_up_caches();
            }
        }
    }

    /// Start a validation run over `sources`
    ///
    /// Fails right away when no schema could be compiled; otherwise reports
    /// are produced lazily by the returned iterator.
    pub fn validate_documents(
        &mut self,
        sources: Vec<DocumentSource>,
        options: ValidateOptions,
    ) -> Result<DocumentValidation<'_>> {
        if !self.schemas.values().any(|record| record.validator.is_some()) {
            return Err(ValidatorError::NoSchemasLoaded);
        }
        self.cleanup();
        Ok(DocumentValidation::new(self, sources, options))
    }

    /// Clear per-run extension state
    pub(crate) fn cleanup(&mut self) {
        for record in self.schemas.values_mut() {
            for extension in &mut record.extensions {
                extension.as_validator_mut().cleanup();
            }
        }
    }

    fn schema_hint(&self, json: &Value, key_paths: &[String]) -> Option<String> {
        let root = self
            .config
            .json_root_tag
            .as_deref()
            .and_then(|tag| json.get(tag))
            .unwrap_or(json);
        key_paths.iter().find_map(|path| {
            materialize(root, path)
                .into_iter()
                .find_map(|value| value.as_str().map(|hint| defrag(hint).0))
        })
    }

    /// Pass 1 for one document
    pub(crate) fn first_pass(&mut self, file: String, json: Value, options: &ValidateOptions) -> FirstPass {
        let key_paths = options
            .schema_key_paths
            .clone()
            .unwrap_or_else(|| self.config.schema_key_paths.clone());
        let mut report = DocumentReport::new(file.clone());

        let chosen = match self.schema_hint(&json, &key_paths) {
            Some(uri) if !self.schemas.contains_key(&uri) => {
                report.errors.push(ReportError::new(
                    ErrorReason::SchemaUnknown,
                    format!("Schema with URI {uri} was not loaded"),
                ));
                None
            }
            Some(uri) => {
                let errors = self.check_document(&uri, &file, &json);
                report.errors.extend(errors);
                Some(uri)
            }
            None => match &options.guess {
                GuessMode::Off => {
                    report.errors.push(ReportError::new(
                        ErrorReason::NoId,
                        "No hint to identify the correct JSON Schema to be used to validate",
                    ));
                    None
                }
                GuessMode::All => {
                    let candidates: Vec<String> = self.schemas.keys().cloned().collect();
                    self.guess_schema(&file, &json, &candidates, &mut report)
                }
                GuessMode::Only(allowed) => {
                    let candidates = allowed.clone();
                    self.guess_schema(&file, &json, &candidates, &mut report)
                }
            },
        };

        if let Some(record) = chosen.as_deref().and_then(|uri| self.schemas.get(uri)) {
            report.schema_id = Some(record.uri.clone());
            report.schema_hash = Some(record.content_hash.to_string());
        }
        report.json = Some(json);

        if report.is_valid() {
            FirstPass::Held(report)
        } else {
            for error in &report.errors {
                debug!("{}: {}", report.file, error);
            }
            FirstPass::Failed(report)
        }
    }

    /// First candidate validating `json` cleanly; failed attempts are forgotten
    fn guess_schema(
        &mut self,
        file: &str,
        json: &Value,
        candidates: &[String],
        report: &mut DocumentReport,
    ) -> Option<String> {
        for uri in candidates {
            let usable = self
                .schemas
                .get(uri)
                .map_or(false, |record| record.validator.is_some());
            if !usable {
                continue;
            }
            if self.check_document(uri, file, json).is_empty() {
                debug!("Guessed schema {} for {}", uri, file);
                return Some(uri.clone());
            }
            self.forget(uri, file);
        }
        report.errors.push(ReportError::new(
            ErrorReason::SchemaUnknown,
            format!("No loaded schema validates {file}"),
        ));
        None
    }

    fn forget(&mut self, uri: &str, file: &str) {
        if let Some(record) = self.schemas.get_mut(uri) {
            for extension in &mut record.extensions {
                extension.as_validator_mut().forget(file);
            }
        }
    }

    /// Schema validation plus extension checks of one document against `uri`
    fn check_document(&mut self, uri: &str, file: &str, json: &Value) -> Vec<ReportError> {
        let Some(record) = self.schemas.get(uri) else {
            return vec![ReportError::new(
                ErrorReason::SchemaUnknown,
                format!("Schema with URI {uri} was not loaded"),
            )];
        };

        let mut errors: Vec<ReportError> = record
            .all_errors()
            .cloned()
            .map(|error| attributed(error, uri))
            .collect();
        let Some(validator) = record.validator.clone() else {
            return errors;
        };

        if let Err(failures) = validator.validate(json) {
            let before = errors.len();
            errors.extend(failures.map(|failure| {
                let path = failure.instance_path.to_string();
                ReportError::new(
                    ErrorReason::SchemaError,
                    format!("Path: {} . Message: {}", path, failure),
                )
                .with_path(path)
                .with_schema_id(uri)
            }));
            if errors.len() > before {
                return errors;
            }
        }

        let applications = SchemaWalker::new(
            &self.arena,
            &mut self.compiler,
            &self.registry,
            &self.active_features,
        )
        .walk(uri, json);

        let Some(record) = self.schemas.get_mut(uri) else {
            return errors;
        };
        for application in &applications {
            let Some(extension) = record
                .extensions
                .iter_mut()
                .find(|extension| extension.kind() == application.kind)
            else {
                continue;
            };
            let hit = application.as_hit();
            errors.extend(
                extension
                    .as_validator_mut()
                    .validate(&hit, file)
                    .into_iter()
                    .map(|error| attributed(error, uri)),
            );
        }
        errors
    }

    /// Pass 2: gather every context, then run the cross-document checks
    ///
    /// Returns the errors found, keyed by the document they belong to.
    pub(crate) fn second_pass(&mut self) -> BTreeMap<String, Vec<ReportError>> {
        self.warm_up_caches();

        let mut contexts = GatheredContexts::default();
        for record in self.schemas.values() {
            for extension in &record.extensions {
                if let Some(context) = extension.as_validator().get_context() {
                    contexts.push(context);
                }
            }
        }

        let mut by_document: BTreeMap<String, Vec<ReportError>> = BTreeMap::new();
        for record in self.schemas.values() {
            for extension in &record.extensions {
                let validator = extension.as_validator();
                if !validator.needs_second_pass() {
                    continue;
                }
                let outcome = validator.do_second_pass(&contexts);
                debug!(
                    "Second pass of {} for {}: {} documents, {} failed",
                    validator.kind(),
                    record.uri,
                    outcome.processed.len(),
                    outcome.failed.len()
                );
                for (document, error) in outcome.errors {
                    by_document.entry(document).or_default().push(error);
                }
            }
        }
        by_document
    }
}

impl std::fmt::Debug for ExtensibleValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensibleValidator")
            .field("kinds", &self.registry.kinds())
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("rejected", &self.rejected.len())
            .finish()
    }
}

fn placeholder(candidate: &SchemaCandidate) -> SchemaRecord {
    SchemaRecord {
        source: candidate.source.clone(),
        schema: Arc::clone(&candidate.schema),
        content_hash: candidate.content_hash.clone(),
        uri: candidate.uri.clone(),
        draft: candidate.draft,
        anonymous: candidate.anonymous,
        errors: Vec::new(),
        bootstrap_errors: Vec::new(),
        validator: None,
        extensions: Vec::new(),
        resolved_schema: None,
    }
}

fn attributed(error: ReportError, uri: &str) -> ReportError {
    if error.schema_id.is_some() {
        error
    } else {
        error.with_schema_id(uri)
    }
}
