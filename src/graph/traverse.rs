//! Feature traversal
//!
//! Walks one schema document and records every occurrence of a trigger
//! keyword (plus every `$ref`) together with its structural location.
//!
//! ## Rules
//!
//! - An object declaring a `$id` that resolves to a different resource starts
//!   a new traversal pass for that resource, with its own pointer space.
//! - Inside a `$ref` object every sibling of `$ref` is ignored.
//! - Keys of name maps (`properties`, `definitions`...) are names, not
//!   keywords, and data keywords (`enum`, `const`...) are never descended.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::arena::{FragmentArena, NodeId, OccurrenceId};
use crate::compiler::DraftVersion;
use crate::uri::{defrag, join, pointer_child};

/// Keyword every traversal tracks besides the extension triggers
pub const REF_KEYWORD: &str = "$ref";

const NAME_MAPS: &[&str] = &[
    "properties",
    "patternProperties",
    "definitions",
    "$defs",
    "dependencies",
];

const DATA_KEYWORDS: &[&str] = &["enum", "const", "default", "examples"];

/// One syntactic occurrence of a tracked keyword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLocation {
    /// Resource the occurrence belongs to
    pub schema_uri: String,
    /// Plain-name anchor of the enclosing fragment, if it declares one
    pub fragment: Option<String>,
    /// JSON Pointer of the keyword inside the resource
    pub path: String,
    /// Enclosing fragment
    pub node: NodeId,
    pub id: OccurrenceId,
}

/// Per-schema feature index
#[derive(Debug, Clone, Default)]
pub struct FeatureGraph {
    /// keyword -> occurrences, in traversal order
    pub key_refs: BTreeMap<String, Vec<FeatureLocation>>,
    /// fragment -> keyword -> occurrence ids
    pub node_features: BTreeMap<NodeId, BTreeMap<String, Vec<OccurrenceId>>>,
    /// JSON Pointer -> occurrence id
    pub pointers: BTreeMap<String, OccurrenceId>,
}

impl FeatureGraph {
    pub fn locations(&self, keyword: &str) -> &[FeatureLocation] {
        self.key_refs.get(keyword).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, keyword: &str) -> bool {
        !self.locations(keyword).is_empty()
    }

    fn record(&mut self, keyword: &str, location: FeatureLocation) {
        let ids = self
            .node_features
            .entry(location.node)
            .or_default()
            .entry(keyword.to_string())
            .or_default();
        if ids.contains(&location.id) {
            return;
        }
        ids.push(location.id);
        self.key_refs
            .entry(keyword.to_string())
            .or_default()
            .push(location);
    }

    /// Merge another graph in, deduplicating by occurrence id
    pub fn merge(&mut self, other: &FeatureGraph) {
        for (keyword, locations) in &other.key_refs {
            for location in locations {
                self.record(keyword, location.clone());
            }
        }
        for (pointer, id) in &other.pointers {
            self.pointers.entry(pointer.clone()).or_insert(*id);
        }
    }

    /// Union of every traversal pass recorded for one schema URI
    pub fn flatten(passes: &[FeatureGraph]) -> FeatureGraph {
        let mut merged = FeatureGraph::default();
        for pass in passes {
            merged.merge(pass);
        }
        merged
    }
}

/// A trigger keyword whose value failed its own syntax check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedOccurrence {
    pub schema_uri: String,
    pub path: String,
    pub keyword: String,
}

/// Everything one schema document contributed
#[derive(Debug, Default)]
pub struct TraversalOutcome {
    /// resource URI -> one graph per traversal pass
    pub passes: BTreeMap<String, Vec<FeatureGraph>>,
    /// (enclosing resource, nested resource) pairs
    pub embedded: Vec<(String, String)>,
    pub malformed: Vec<MalformedOccurrence>,
}

struct PendingPass {
    uri: String,
    document_pointer: String,
}

struct Traversal<'t> {
    document: &'t Arc<Value>,
    draft: DraftVersion,
    triggers: &'t BTreeSet<String>,
    accepts: &'t dyn Fn(&str, &Value) -> bool,
    arena: &'t mut FragmentArena,
    pending: Vec<PendingPass>,
    outcome: TraversalOutcome,
}

/// Traverse a schema document registered under `schema_uri`
///
/// `accepts` checks the value of a trigger keyword against the keyword's own
/// syntax; rejected occurrences are reported in
/// [`TraversalOutcome::malformed`] and left out of the graph.
pub fn traverse(
    document: &Arc<Value>,
    schema_uri: &str,
    draft: DraftVersion,
    triggers: &BTreeSet<String>,
    accepts: &dyn Fn(&str, &Value) -> bool,
    arena: &mut FragmentArena,
) -> TraversalOutcome {
    let mut traversal = Traversal {
        document,
        draft,
        triggers,
        accepts,
        arena,
        pending: vec![PendingPass {
            uri: schema_uri.to_string(),
            document_pointer: String::new(),
        }],
        outcome: TraversalOutcome::default(),
    };

    while let Some(pass) = traversal.pending.pop() {
        traversal.run_pass(pass);
    }
    traversal.outcome
}

impl<'t> Traversal<'t> {
    fn run_pass(&mut self, pass: PendingPass) {
        let document = Arc::clone(self.document);
        let Some(root) = document.pointer(&pass.document_pointer) else {
            return;
        };
        self.arena
            .register_resource(&pass.uri, Arc::clone(&document), &pass.document_pointer, self.draft);

        let mut graph = FeatureGraph::default();
        self.visit_schema(&mut graph, root, &pass.uri, "", &pass.document_pointer, true);
        self.outcome
            .passes
            .entry(pass.uri)
            .or_default()
            .push(graph);
    }

    fn visit_schema(
        &mut self,
        graph: &mut FeatureGraph,
        value: &Value,
        uri: &str,
        pointer: &str,
        document_pointer: &str,
        is_root: bool,
    ) {
        let map = match value {
            Value::Object(map) => map,
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let token = i.to_string();
                    self.visit_schema(
                        graph,
                        item,
                        uri,
                        &pointer_child(pointer, &token),
                        &pointer_child(document_pointer, &token),
                        false,
                    );
                }
                return;
            }
            _ => return,
        };

        let mut anchor = None;
        if let Some(id) = map.get("$id").and_then(Value::as_str) {
            let (nested, fragment) = defrag(&join(uri, id));
            if !is_root && nested != uri {
                self.outcome.embedded.push((uri.to_string(), nested.clone()));
                self.pending.push(PendingPass {
                    uri: nested,
                    document_pointer: document_pointer.to_string(),
                });
                return;
            }
            anchor = fragment.filter(|f| !f.is_empty());
        }

        let node = self.arena.intern_node(uri, pointer, document_pointer);
        let is_ref = matches!(map.get(REF_KEYWORD), Some(Value::String(_)));

        for (key, child) in map {
            if is_ref && key != REF_KEYWORD {
                continue;
            }
            let child_pointer = pointer_child(pointer, key);
            let child_document_pointer = pointer_child(document_pointer, key);
            let occurrence = self.arena.intern_occurrence(node, key);
            graph.pointers.insert(child_pointer.clone(), occurrence);

            if key == REF_KEYWORD || self.triggers.contains(key) {
                if key != REF_KEYWORD && !(self.accepts)(key, child) {
                    self.outcome.malformed.push(MalformedOccurrence {
                        schema_uri: uri.to_string(),
                        path: child_pointer,
                        keyword: key.clone(),
                    });
                    continue;
                }
                graph.record(
                    key,
                    FeatureLocation {
                        schema_uri: uri.to_string(),
                        fragment: anchor.clone(),
                        path: child_pointer,
                        node,
                        id: occurrence,
                    },
                );
                continue;
            }

            if DATA_KEYWORDS.contains(&key.as_str()) {
                continue;
            }
            if NAME_MAPS.contains(&key.as_str()) {
                self.visit_name_map(graph, child, uri, &child_pointer, &child_document_pointer);
            } else {
                self.visit_schema(graph, child, uri, &child_pointer, &child_document_pointer, false);
            }
        }
    }

    fn visit_name_map(
        &mut self,
        graph: &mut FeatureGraph,
        value: &Value,
        uri: &str,
        pointer: &str,
        document_pointer: &str,
    ) {
        let Value::Object(map) = value else {
            return;
        };
        for (name, child) in map {
            self.visit_schema(
                graph,
                child,
                uri,
                &pointer_child(pointer, name),
                &pointer_child(document_pointer, name),
                false,
            );
        }
    }
}
