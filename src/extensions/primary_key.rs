//! `primary_key` keyword

use tracing::{error, warn};

use super::{
    BootstrapEnv, ExtensionKind, FeatureValidator, KeyProviders, KeyWorld, KeywordHit, NamedContext,
    ProvidedKeys, UniqueKey,
};
use crate::config::ValidatorConfig;
use crate::error::{ErrorReason, ReportError};
use crate::graph::FeatureGraph;

/// Unique key whose value set is seeded by external providers
#[derive(Debug)]
pub struct PrimaryKey {
    unique: UniqueKey,
    providers: KeyProviders,
    provided: ProvidedKeys,
    populated: bool,
    /// Provider-vs-provider collisions of the last merge, reported against the schema
    collisions: Vec<ReportError>,
}

impl PrimaryKey {
    pub fn new(schema_uri: &str, config: &ValidatorConfig) -> Self {
        Self {
            unique: UniqueKey::with_kind(ExtensionKind::PrimaryKey, ErrorReason::DupPk, schema_uri),
            providers: KeyProviders::new(schema_uri, config),
            provided: ProvidedKeys::default(),
            populated: false,
            collisions: Vec::new(),
        }
    }

    pub fn world(&self) -> &KeyWorld {
        self.unique.world()
    }

    pub fn provided(&self) -> &ProvidedKeys {
        &self.provided
    }

    /// Merge provider lists into the provided key set, once per run
    fn populate(&mut self) {
        if self.populated {
            return;
        }
        self.providers.warm_up();
        self.provided.clear();
        self.collisions.clear();
        let allow_duplicates = self.providers.allow_duplicates();
        for (source, ids) in self.providers.lists() {
            for (key, other) in self.provided.insert_all(source, ids) {
                if allow_duplicates {
                    warn!("Key {} is provided by both {} and {}", key, other, source);
                } else {
                    let description = format!(
                        "Duplicated primary_key value -=> {key} <=-  (provided by both {other} and {source})"
                    );
                    error!("{} in {}", description, self.unique.schema_uri());
                    self.collisions.push(
                        ReportError::new(ErrorReason::DupPk, description).with_schema_id(self.unique.schema_uri()),
                    );
                }
            }
        }
        self.populated = true;
    }
}

impl FeatureValidator for PrimaryKey {
    fn kind(&self) -> ExtensionKind {
        ExtensionKind::PrimaryKey
    }

    fn needs_bootstrapping(&self) -> bool {
        true
    }

    /// Merges the provider lists; their collisions belong to the schema, not to any document
    fn bootstrap(&mut self, graph: &FeatureGraph, env: &BootstrapEnv<'_>) -> Vec<ReportError> {
        let mut errors = self.unique.bootstrap(graph, env);
        self.populate();
        errors.extend(self.collisions.iter().cloned());
        errors
    }

    fn validate(&mut self, hit: &KeywordHit<'_>, document: &str) -> Vec<ReportError> {
        self.populate();
        let provided = &self.provided;
        self.unique
            .check_and_record(hit, document, &|key| provided.source(key).map(str::to_string))
    }

    fn forget(&mut self, document: &str) -> bool {
        self.unique.forget(document)
    }

    fn get_context(&self) -> Option<NamedContext<'_>> {
        Some(NamedContext {
            kind: ExtensionKind::PrimaryKey,
            schema_uri: self.unique.schema_uri(),
            world: self.unique.world(),
            provided: Some(&self.provided),
        })
    }

    fn warm_up_caches(&mut self) {
        self.populate();
    }

    fn invalidate_caches(&mut self) {
        self.providers.invalidate();
        self.provided.clear();
        self.populated = false;
    }

    fn cleanup(&mut self) {
        self.unique.cleanup();
        self.populated = false;
    }
}
