//! `foreign_keys` and `join_keys` keywords
//!
//! Both record the values they observe during pass 1 and judge them only in
//! pass 2, against the key worlds of the referenced schema: primary keys for
//! `foreign_keys`, indexes for `join_keys`.

use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    BootstrapEnv, ExtensionKind, FeatureValidator, GatheredContexts, KeyDefinition, KeywordHit,
    ProvidedKeys, SecondPassOutcome,
};
use crate::error::{ErrorReason, ReportError};
use crate::graph::{FeatureGraph, NodeId};
use crate::key_path::KeyMembers;
use crate::uri::{defrag, join, pointer_child};

/// One element of a `foreign_keys` / `join_keys` array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefDeclaration {
    pub schema_id: String,
    pub members: Vec<String>,
    pub refers_to: Option<String>,
}

impl RefDeclaration {
    /// Well-formed declarations of a keyword value, with their array index
    pub fn parse_list(value: &Value) -> Vec<(usize, RefDeclaration)> {
        let Some(items) = value.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let schema_id = item.get("schema_id")?.as_str()?.to_string();
                let members: Option<Vec<String>> = item
                    .get("members")?
                    .as_array()?
                    .iter()
                    .map(|m| m.as_str().map(str::to_string))
                    .collect();
                let members = members.filter(|m| !m.is_empty())?;
                let refers_to = item
                    .get("refers_to")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some((i, RefDeclaration { schema_id, members, refers_to }))
            })
            .collect()
    }
}

/// A value seen in pass 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedKey {
    pub key: String,
    /// The same key qualified by its document, for scope-limited targets
    pub scoped_key: String,
    pub document: String,
    pub instance_path: String,
}

/// One declared reference
#[derive(Debug, Clone)]
pub struct RefDefinition {
    /// Resource declaring the reference
    pub schema_uri: String,
    pub path: String,
    /// Absolute URI of the referenced schema
    pub ref_schema_uri: String,
    pub members: KeyMembers,
    pub refers_to: Option<String>,
    pub values: Vec<ObservedKey>,
}

/// Base of `foreign_keys` and `join_keys`
#[derive(Debug)]
pub struct RefKey {
    kind: ExtensionKind,
    schema_uri: String,
    /// (fragment, index in the keyword array) -> definition
    definitions: BTreeMap<(NodeId, usize), RefDefinition>,
}

impl RefKey {
    pub fn foreign_key(schema_uri: &str) -> Self {
        Self::with_kind(ExtensionKind::ForeignKey, schema_uri)
    }

    pub fn join_key(schema_uri: &str) -> Self {
        Self::with_kind(ExtensionKind::JoinKey, schema_uri)
    }

    fn with_kind(kind: ExtensionKind, schema_uri: &str) -> Self {
        Self {
            kind,
            schema_uri: schema_uri.to_string(),
            definitions: BTreeMap::new(),
        }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &RefDefinition> {
        self.definitions.values()
    }

    fn stale_reason(&self) -> ErrorReason {
        match self.kind {
            ExtensionKind::JoinKey => ErrorReason::StaleJk,
            _ => ErrorReason::StaleFk,
        }
    }

    fn dangling_reason(&self) -> ErrorReason {
        match self.kind {
            ExtensionKind::JoinKey => ErrorReason::DanglingJk,
            _ => ErrorReason::DanglingFk,
        }
    }

    fn label(&self) -> &'static str {
        match self.kind {
            ExtensionKind::JoinKey => "JK",
            _ => "FK",
        }
    }

    fn declare(&mut self, node: NodeId, schema_uri: &str, path: &str, value: &Value) {
        for (i, declaration) in RefDeclaration::parse_list(value) {
            let (ref_schema_uri, _) = defrag(&join(schema_uri, &declaration.schema_id));
            self.definitions.entry((node, i)).or_insert_with(|| RefDefinition {
                schema_uri: schema_uri.to_string(),
                path: path.to_string(),
                ref_schema_uri,
                members: KeyMembers::Paths(declaration.members),
                refers_to: declaration.refers_to,
                values: Vec::new(),
            });
        }
    }

    fn has_node(&self, node: NodeId) -> bool {
        self.definitions
            .range((node, 0)..=(node, usize::MAX))
            .next()
            .is_some()
    }
}

/// Key sets of the referenced schema a reference is checked against
struct Targets<'a> {
    definitions: Vec<&'a KeyDefinition>,
    provided: Vec<&'a ProvidedKeys>,
}

impl Targets<'_> {
    fn is_empty(&self) -> bool {
        self.definitions.is_empty() && self.provided.iter().all(|p| p.is_empty())
    }

    fn contains(&self, observed: &ObservedKey) -> bool {
        self.definitions.iter().any(|d| {
            let key = if d.limit_scope { &observed.scoped_key } else { &observed.key };
            d.contains(key)
        }) || self.provided.iter().any(|p| p.contains(&observed.key))
    }
}

impl FeatureValidator for RefKey {
    fn kind(&self) -> ExtensionKind {
        self.kind
    }

    fn needs_bootstrapping(&self) -> bool {
        true
    }

    fn bootstrap(&mut self, graph: &FeatureGraph, env: &BootstrapEnv<'_>) -> Vec<ReportError> {
        let keyword = self.trigger_attribute();
        let mut errors = Vec::new();
        for location in graph.locations(keyword) {
            let Some(value) = env
                .arena
                .value(location.node)
                .and_then(|node| node.get(keyword))
            else {
                continue;
            };
            self.declare(location.node, &location.schema_uri, &location.path, value);

            for (_, declaration) in RefDeclaration::parse_list(value) {
                let (absolute, _) = defrag(&join(&location.schema_uri, &declaration.schema_id));
                if !env.loaded.contains(&absolute) {
                    errors.push(
                        ReportError::new(
                            ErrorReason::FkNoSchema,
                            format!(
                                "No schema with {} id, required by {} ({})",
                                absolute, env.source, self.schema_uri
                            ),
                        )
                        .with_path(location.path.clone())
                        .with_schema_id(self.schema_uri.clone()),
                    );
                }
            }
        }
        errors
    }

    fn validate(&mut self, hit: &KeywordHit<'_>, document: &str) -> Vec<ReportError> {
        if !self.has_node(hit.node) {
            let path = pointer_child(hit.node_path, self.trigger_attribute());
            self.declare(hit.node, hit.schema_uri, &path, hit.keyword_value);
        }
        for (_, definition) in self
            .definitions
            .range_mut((hit.node, 0)..=(hit.node, usize::MAX))
        {
            let keys = definition.members.key_strings(hit.instance, None);
            let scoped = definition.members.key_strings(hit.instance, Some(document));
            for (key, scoped_key) in keys.into_iter().zip(scoped) {
                definition.values.push(ObservedKey {
                    key,
                    scoped_key,
                    document: document.to_string(),
                    instance_path: hit.instance_path.to_string(),
                });
            }
        }
        Vec::new()
    }

    fn forget(&mut self, document: &str) -> bool {
        let mut changed = false;
        for definition in self.definitions.values_mut() {
            let before = definition.values.len();
            definition.values.retain(|observed| observed.document != document);
            changed |= definition.values.len() != before;
        }
        changed
    }

    fn needs_second_pass(&self) -> bool {
        true
    }

    fn do_second_pass(&self, contexts: &GatheredContexts<'_>) -> SecondPassOutcome {
        let mut outcome = SecondPassOutcome::default();
        let Some(target_kind) = self.kind.referenced_kind() else {
            return outcome;
        };

        for definition in self.definitions.values() {
            if definition.values.is_empty() {
                continue;
            }

            let mut targets = Targets {
                definitions: Vec::new(),
                provided: Vec::new(),
            };
            for context in contexts.get(target_kind) {
                let context_matches = context.schema_uri == definition.ref_schema_uri;
                for key_definition in context.world.definitions() {
                    let schema_matches =
                        context_matches || key_definition.schema_uri == definition.ref_schema_uri;
                    let name_matches = definition
                        .refers_to
                        .as_deref()
                        .map_or(true, |name| key_definition.name == name);
                    if schema_matches && name_matches && !key_definition.values.is_empty() {
                        targets.definitions.push(key_definition);
                    }
                }
                if context_matches {
                    if let Some(provided) = context.provided {
                        targets.provided.push(provided);
                    }
                }
            }

            let dangling = targets.is_empty();
            for observed in &definition.values {
                outcome.processed.insert(observed.document.clone());
                let error = if dangling {
                    ReportError::new(
                        self.dangling_reason(),
                        format!(
                            "No available documents from {} schema, required by {}",
                            definition.ref_schema_uri, self.schema_uri
                        ),
                    )
                } else if !targets.contains(observed) {
                    ReportError::new(
                        self.stale_reason(),
                        format!(
                            "Unmatching {} ({}) in {} to schema {}",
                            self.label(),
                            observed.key,
                            observed.document,
                            definition.ref_schema_uri
                        ),
                    )
                } else {
                    continue;
                };
                outcome.failed.insert(observed.document.clone());
                outcome.errors.push((
                    observed.document.clone(),
                    error
                        .with_path(observed.instance_path.clone())
                        .with_schema_id(self.schema_uri.clone()),
                ));
            }
        }
        outcome
    }

    fn cleanup(&mut self) {
        for definition in self.definitions.values_mut() {
            definition.values.clear();
        }
    }
}
