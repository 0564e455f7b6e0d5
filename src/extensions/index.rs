//! `index` keyword and the key world shared by every key-defining extension

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use super::{undeclared_key_error, ExtensionKind, FeatureValidator, KeywordHit, NamedContext};
use super::BootstrapEnv;
use crate::error::ReportError;
use crate::graph::{FeatureGraph, FragmentArena, NodeId};
use crate::key_path::KeyMembers;
use crate::uri::pointer_child;

/// Parsed value of an `index` / `unique` / `primary_key` keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeclaration {
    pub members: KeyMembers,
    pub name: Option<String>,
    pub limit_scope: bool,
}

impl KeyDeclaration {
    /// `None` when the value declares no key (e.g. `false`)
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                members: KeyMembers::from_declaration(map.get("members")?)?,
                name: map.get("name").and_then(Value::as_str).map(str::to_string),
                limit_scope: map
                    .get("limit_scope")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => Some(Self {
                members: KeyMembers::from_declaration(other)?,
                name: None,
                limit_scope: false,
            }),
        }
    }
}

/// First document (and instance location) that produced a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHolder {
    pub document: String,
    pub instance_path: String,
}

/// One key declared on one schema fragment
#[derive(Debug, Clone)]
pub struct KeyDefinition {
    /// Resource declaring the key
    pub schema_uri: String,
    /// Pointer of the keyword inside that resource
    pub path: String,
    pub members: KeyMembers,
    pub name: String,
    pub limit_scope: bool,
    /// canonical key string -> documents holding it
    pub values: BTreeMap<String, BTreeSet<String>>,
    holders: BTreeMap<String, KeyHolder>,
}

impl KeyDefinition {
    fn new(schema_uri: &str, path: &str, declaration: KeyDeclaration, name: String) -> Self {
        Self {
            schema_uri: schema_uri.to_string(),
            path: path.to_string(),
            members: declaration.members,
            name,
            limit_scope: declaration.limit_scope,
            values: BTreeMap::new(),
            holders: BTreeMap::new(),
        }
    }

    /// Key strings `value` yields in `document`
    pub fn key_strings(&self, value: &Value, document: &str) -> Vec<String> {
        let scope = self.limit_scope.then_some(document);
        self.members.key_strings(value, scope)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn holder(&self, key: &str) -> Option<&KeyHolder> {
        self.holders.get(key)
    }

    pub fn record(&mut self, key: String, document: &str, instance_path: &str) {
        self.holders.entry(key.clone()).or_insert_with(|| KeyHolder {
            document: document.to_string(),
            instance_path: instance_path.to_string(),
        });
        self.values
            .entry(key)
            .or_default()
            .insert(document.to_string());
    }

    fn forget(&mut self, document: &str) -> bool {
        let mut changed = false;
        self.values.retain(|_, documents| {
            changed |= documents.remove(document);
            !documents.is_empty()
        });
        let values = &self.values;
        self.holders
            .retain(|key, holder| holder.document != document && values.contains_key(key));
        changed
    }

    fn clear_values(&mut self) {
        self.values.clear();
        self.holders.clear();
    }
}

/// Key definitions of one extension instance, by fragment
#[derive(Debug, Clone, Default)]
pub struct KeyWorld {
    definitions: BTreeMap<NodeId, KeyDefinition>,
    by_name: BTreeMap<String, NodeId>,
}

impl KeyWorld {
    /// Register every declaration of `keyword` found in the feature graph
    pub fn bootstrap(&mut self, keyword: &str, graph: &FeatureGraph, arena: &FragmentArena) {
        for location in graph.locations(keyword) {
            let Some(declaration) = arena
                .value(location.node)
                .and_then(|node| node.get(keyword))
                .and_then(KeyDeclaration::parse)
            else {
                continue;
            };
            self.declare(location.node, &location.schema_uri, &location.path, declaration, keyword);
        }
    }

    fn declare(
        &mut self,
        node: NodeId,
        schema_uri: &str,
        path: &str,
        declaration: KeyDeclaration,
        keyword: &str,
    ) {
        if self.definitions.contains_key(&node) {
            return;
        }
        let name = declaration
            .name
            .clone()
            .unwrap_or_else(|| format!("{keyword}_{node}"));
        if let Some(previous) = self.by_name.get(&name) {
            warn!(
                "Duplicate {} name '{}' in {} (already used at node {})",
                keyword, name, schema_uri, previous
            );
        } else {
            self.by_name.insert(name.clone(), node);
        }
        self.definitions
            .insert(node, KeyDefinition::new(schema_uri, path, declaration, name));
    }

    /// Definition governing a hit, declared lazily when bootstrap never saw it
    pub fn definition_for(&mut self, hit: &KeywordHit<'_>, keyword: &str) -> Option<&mut KeyDefinition> {
        if !self.definitions.contains_key(&hit.node) {
            let declaration = KeyDeclaration::parse(hit.keyword_value)?;
            let path = pointer_child(hit.node_path, keyword);
            self.declare(hit.node, hit.schema_uri, &path, declaration, keyword);
        }
        self.definitions.get_mut(&hit.node)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &KeyDefinition> {
        self.definitions.values()
    }

    pub fn by_name(&self, name: &str) -> Option<&KeyDefinition> {
        self.by_name.get(name).and_then(|node| self.definitions.get(node))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn forget(&mut self, document: &str) -> bool {
        let mut changed = false;
        for definition in self.definitions.values_mut() {
            changed |= definition.forget(document);
        }
        changed
    }

    pub fn clear_values(&mut self) {
        for definition in self.definitions.values_mut() {
            definition.clear_values();
        }
    }
}

/// `index`: records key values, never fails a document
#[derive(Debug)]
pub struct IndexKey {
    schema_uri: String,
    world: KeyWorld,
}

impl IndexKey {
    pub fn new(schema_uri: &str) -> Self {
        Self {
            schema_uri: schema_uri.to_string(),
            world: KeyWorld::default(),
        }
    }

    pub fn world(&self) -> &KeyWorld {
        &self.world
    }
}

impl FeatureValidator for IndexKey {
    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Index
    }

    fn needs_bootstrapping(&self) -> bool {
        true
    }

    fn bootstrap(&mut self, graph: &FeatureGraph, env: &BootstrapEnv<'_>) -> Vec<ReportError> {
        self.world.bootstrap(self.trigger_attribute(), graph, env.arena);
        Vec::new()
    }

    fn validate(&mut self, hit: &KeywordHit<'_>, document: &str) -> Vec<ReportError> {
        let keyword = self.trigger_attribute();
        if hit.keyword_value == &Value::Bool(false) {
            return Vec::new();
        }
        let Some(definition) = self.world.definition_for(hit, keyword) else {
            return vec![undeclared_key_error(keyword, hit)];
        };
        for key in definition.key_strings(hit.instance, document) {
            definition.record(key, document, hit.instance_path);
        }
        Vec::new()
    }

    fn forget(&mut self, document: &str) -> bool {
        self.world.forget(document)
    }

    fn get_context(&self) -> Option<NamedContext<'_>> {
        Some(NamedContext {
            kind: self.kind(),
            schema_uri: &self.schema_uri,
            world: &self.world,
            provided: None,
        })
    }

    fn cleanup(&mut self) {
        self.world.clear_values();
    }
}
