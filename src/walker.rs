//! Keyword applicator walk
//!
//! Walks a document alongside its schema, following the applicators the
//! compiled validator follows (`$ref`, `properties`, `items`, `allOf`...),
//! and reports every schema node carrying an enabled trigger keyword together
//! with the instance value it governs. Conditional applicators only descend
//! into branches the value satisfies, so a value never feeds the key world of
//! a branch that does not apply to it.

use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::compiler::{DraftVersion, SchemaCompiler};
use crate::extensions::{ExtensionKind, ExtensionRegistry, KeywordHit};
use crate::graph::{FragmentArena, Located, NodeId};
use crate::uri::{join, pointer_child};

/// A trigger keyword applying to one instance value
#[derive(Debug, Clone)]
pub struct KeywordApplication<'i> {
    pub kind: ExtensionKind,
    pub node: NodeId,
    pub resource_uri: String,
    pub node_path: String,
    pub keyword_value: Value,
    pub instance: &'i Value,
    pub instance_path: String,
}

impl KeywordApplication<'_> {
    pub fn as_hit(&self) -> KeywordHit<'_> {
        KeywordHit {
            node: self.node,
            schema_uri: &self.resource_uri,
            node_path: &self.node_path,
            keyword_value: &self.keyword_value,
            instance: self.instance,
            instance_path: &self.instance_path,
        }
    }
}

pub struct SchemaWalker<'w> {
    arena: &'w FragmentArena,
    compiler: &'w mut SchemaCompiler,
    registry: &'w ExtensionRegistry,
    /// (fragment, keyword) pairs recorded in some feature graph
    active_features: &'w HashSet<(NodeId, String)>,
    patterns: HashMap<String, Option<Regex>>,
    /// (resource, pointer, instance path) currently being visited
    in_progress: HashSet<(String, String, String)>,
}

impl<'w> SchemaWalker<'w> {
    pub fn new(
        arena: &'w FragmentArena,
        compiler: &'w mut SchemaCompiler,
        registry: &'w ExtensionRegistry,
        active_features: &'w HashSet<(NodeId, String)>,
    ) -> Self {
        Self {
            arena,
            compiler,
            registry,
            active_features,
            patterns: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Every keyword application of `instance` validated against `schema_uri`
    pub fn walk<'i>(&mut self, schema_uri: &str, instance: &'i Value) -> Vec<KeywordApplication<'i>> {
        let mut out = Vec::new();
        match self.arena.locate(schema_uri) {
            Some(root) => self.visit(&root, instance, "", &mut out),
            None => debug!("Schema {} has no registered resource to walk", schema_uri),
        }
        out
    }

    fn draft_of(&self, resource_uri: &str) -> DraftVersion {
        self.arena
            .resource(resource_uri)
            .map_or(DraftVersion::Draft7, |resource| resource.draft)
    }

    fn satisfies(&mut self, at: &Located<'w>, instance: &Value) -> bool {
        let draft = self.draft_of(&at.resource_uri);
        match at.value {
            Value::Bool(accepts) => *accepts,
            _ => self
                .compiler
                .branch_is_valid(&at.resource_uri, &at.pointer, draft, instance),
        }
    }

    fn pattern(&mut self, source: &str) -> Option<Regex> {
        self.patterns
            .entry(source.to_string())
            .or_insert_with(|| Regex::new(source).ok())
            .clone()
    }

    fn visit<'i>(
        &mut self,
        at: &Located<'w>,
        instance: &'i Value,
        instance_path: &str,
        out: &mut Vec<KeywordApplication<'i>>,
    ) {
        let Value::Object(map) = at.value else {
            return;
        };
        let guard = (
            at.resource_uri.clone(),
            at.pointer.clone(),
            instance_path.to_string(),
        );
        if !self.in_progress.insert(guard.clone()) {
            return;
        }

        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let target = join(&at.resource_uri, reference);
            match self.arena.locate(&target) {
                Some(next) => self.visit(&next, instance, instance_path, out),
                None => debug!("Unable to follow $ref {} while walking", target),
            }
            self.in_progress.remove(&guard);
            return;
        }

        self.collect_triggers(at, instance, instance_path, out);

        match instance {
            Value::Object(members) => self.visit_object(at, instance, members, instance_path, out),
            Value::Array(items) => self.visit_array(at, items, instance_path, out),
            _ => {}
        }

        for keyword in ["allOf", "anyOf", "oneOf"] {
            let Some(branches) = map.get(keyword).and_then(Value::as_array) else {
                continue;
            };
            let Some(list) = self.arena.step(at, keyword) else {
                continue;
            };
            for i in 0..branches.len() {
                let Some(branch) = self.arena.step(&list, &i.to_string()) else {
                    continue;
                };
                if keyword == "allOf" || self.satisfies(&branch, instance) {
                    self.visit(&branch, instance, instance_path, out);
                }
            }
        }

        if let Some(condition) = self.arena.step(at, "if") {
            let next = if self.satisfies(&condition, instance) {
                self.visit(&condition, instance, instance_path, out);
                "then"
            } else {
                "else"
            };
            if let Some(branch) = self.arena.step(at, next) {
                self.visit(&branch, instance, instance_path, out);
            }
        }

        self.in_progress.remove(&guard);
    }

    fn collect_triggers<'i>(
        &mut self,
        at: &Located<'w>,
        instance: &'i Value,
        instance_path: &str,
        out: &mut Vec<KeywordApplication<'i>>,
    ) {
        let Value::Object(map) = at.value else {
            return;
        };
        let Some(node) = self.arena.lookup(&at.resource_uri, &at.pointer) else {
            return;
        };
        for (keyword, value) in map {
            let Some(kind) = self.registry.kind_for(keyword) else {
                continue;
            };
            if !self.active_features.contains(&(node, keyword.clone())) {
                continue;
            }
            out.push(KeywordApplication {
                kind,
                node,
                resource_uri: at.resource_uri.clone(),
                node_path: at.pointer.clone(),
                keyword_value: value.clone(),
                instance,
                instance_path: instance_path.to_string(),
            });
        }
    }

    fn visit_object<'i>(
        &mut self,
        at: &Located<'w>,
        instance: &'i Value,
        members: &'i serde_json::Map<String, Value>,
        instance_path: &str,
        out: &mut Vec<KeywordApplication<'i>>,
    ) {
        let mut matched: HashSet<&str> = HashSet::new();

        if let Some(properties) = self.arena.step(at, "properties") {
            if let Value::Object(declared) = properties.value {
                for name in declared.keys() {
                    let (Some(value), Some(sub)) = (members.get(name), self.arena.step(&properties, name)) else {
                        continue;
                    };
                    matched.insert(name.as_str());
                    self.visit(&sub, value, &pointer_child(instance_path, name), out);
                }
            }
        }

        if let Some(patterns) = self.arena.step(at, "patternProperties") {
            if let Value::Object(declared) = patterns.value {
                for source in declared.keys() {
                    let (Some(regex), Some(sub)) = (self.pattern(source), self.arena.step(&patterns, source)) else {
                        continue;
                    };
                    for (name, value) in members {
                        if regex.is_match(name) {
                            matched.insert(name.as_str());
                            self.visit(&sub, value, &pointer_child(instance_path, name), out);
                        }
                    }
                }
            }
        }

        if let Some(additional) = self.arena.step(at, "additionalProperties") {
            for (name, value) in members {
                if !matched.contains(name.as_str()) {
                    self.visit(&additional, value, &pointer_child(instance_path, name), out);
                }
            }
        }

        // schema dependencies apply to the whole object; property lists are skipped
        if let Some(dependencies) = self.arena.step(at, "dependencies") {
            if let Value::Object(declared) = dependencies.value {
                for (name, dependency) in declared {
                    if !members.contains_key(name) || dependency.is_array() {
                        continue;
                    }
                    if let Some(sub) = self.arena.step(&dependencies, name) {
                        self.visit(&sub, instance, instance_path, out);
                    }
                }
            }
        }
    }

    fn visit_array<'i>(
        &mut self,
        at: &Located<'w>,
        items: &'i [Value],
        instance_path: &str,
        out: &mut Vec<KeywordApplication<'i>>,
    ) {
        if let Some(schema) = self.arena.step(at, "items") {
            match schema.value {
                Value::Array(positional) => {
                    for (i, item) in items.iter().enumerate() {
                        let token = i.to_string();
                        let sub = if i < positional.len() {
                            self.arena.step(&schema, &token)
                        } else {
                            self.arena.step(at, "additionalItems")
                        };
                        if let Some(sub) = sub {
                            self.visit(&sub, item, &pointer_child(instance_path, &token), out);
                        }
                    }
                }
                _ => {
                    for (i, item) in items.iter().enumerate() {
                        let token = i.to_string();
                        self.visit(&schema, item, &pointer_child(instance_path, &token), out);
                    }
                }
            }
        }

        if let Some(contains) = self.arena.step(at, "contains") {
            for (i, item) in items.iter().enumerate() {
                if self.satisfies(&contains, item) {
                    self.visit(&contains, item, &pointer_child(instance_path, &i.to_string()), out);
                }
            }
        }
    }
}
