//! `unique` keyword

use serde_json::Value;

use super::{undeclared_key_error, BootstrapEnv, ExtensionKind, FeatureValidator, KeyWorld, KeywordHit, NamedContext};
use crate::error::{ErrorReason, ReportError};
use crate::graph::FeatureGraph;

/// Index that rejects a key already held elsewhere
///
/// A key is a duplicate when it was recorded by another document, or by the
/// same document at another instance location. Revisiting the same value
/// (several applicators reaching one fragment) is not a duplicate.
#[derive(Debug)]
pub struct UniqueKey {
    kind: ExtensionKind,
    reason: ErrorReason,
    schema_uri: String,
    world: KeyWorld,
}

impl UniqueKey {
    pub fn new(schema_uri: &str) -> Self {
        Self::with_kind(ExtensionKind::Unique, ErrorReason::DupUnique, schema_uri)
    }

    pub(crate) fn with_kind(kind: ExtensionKind, reason: ErrorReason, schema_uri: &str) -> Self {
        Self {
            kind,
            reason,
            schema_uri: schema_uri.to_string(),
            world: KeyWorld::default(),
        }
    }

    pub fn world(&self) -> &KeyWorld {
        &self.world
    }

    pub(crate) fn schema_uri(&self) -> &str {
        &self.schema_uri
    }

    /// Record the keys of one hit, reporting those already taken
    ///
    /// `taken_elsewhere` lets callers veto keys held outside the key world
    /// (external providers); it returns where the key was seen.
    pub(crate) fn check_and_record(
        &mut self,
        hit: &KeywordHit<'_>,
        document: &str,
        taken_elsewhere: &dyn Fn(&str) -> Option<String>,
    ) -> Vec<ReportError> {
        let keyword = self.kind.trigger_attribute();
        if hit.keyword_value == &Value::Bool(false) {
            return Vec::new();
        }
        let reason = self.reason;
        let Some(definition) = self.world.definition_for(hit, keyword) else {
            return vec![undeclared_key_error(keyword, hit)];
        };

        let mut errors = Vec::new();
        for key in definition.key_strings(hit.instance, document) {
            let seen_at = match definition.holder(&key) {
                Some(holder)
                    if holder.document != document || holder.instance_path != hit.instance_path =>
                {
                    Some(holder.document.clone())
                }
                Some(_) => None,
                None => taken_elsewhere(&key),
            };
            match seen_at {
                Some(place) => errors.push(
                    ReportError::new(
                        reason,
                        format!("Duplicated {keyword} value -=> {key} <=-  (appeared in {place})"),
                    )
                    .with_path(hit.instance_path),
                ),
                None => definition.record(key, document, hit.instance_path),
            }
        }
        errors
    }
}

impl FeatureValidator for UniqueKey {
    fn kind(&self) -> ExtensionKind {
        self.kind
    }

    fn needs_bootstrapping(&self) -> bool {
        true
    }

    fn bootstrap(&mut self, graph: &FeatureGraph, env: &BootstrapEnv<'_>) -> Vec<ReportError> {
        self.world.bootstrap(self.kind.trigger_attribute(), graph, env.arena);
        Vec::new()
    }

    fn validate(&mut self, hit: &KeywordHit<'_>, document: &str) -> Vec<ReportError> {
        self.check_and_record(hit, document, &|_| None)
    }

    fn forget(&mut self, document: &str) -> bool {
        self.world.forget(document)
    }

    fn get_context(&self) -> Option<NamedContext<'_>> {
        Some(NamedContext {
            kind: self.kind,
            schema_uri: &self.schema_uri,
            world: &self.world,
            provided: None,
        })
    }

    fn cleanup(&mut self) {
        self.world.clear_values();
    }
}
