//! Fragment arena
//!
//! Every schema object visited during traversal gets a stable integer
//! [`NodeId`], and every key of such an object an [`OccurrenceId`]. Ids stay
//! valid for the lifetime of one engine, so repeated visits to the same
//! fragment (through `allOf`, `$ref`, several documents...) correlate.
//!
//! The arena also owns the table of schema resources (top-level schemas and
//! nested `$id` resources), which is what `$ref` targets resolve against.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::DraftVersion;
use crate::uri::{decode_fragment, defrag, join, pointer_child, pointer_tokens};

/// Index of a schema fragment in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of one key occurrence inside a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccurrenceId(pub usize);

/// A schema resource: a loaded schema or a nested `$id` subschema
#[derive(Debug, Clone)]
pub struct Resource {
    pub uri: String,
    /// The whole schema file the resource lives in
    pub document: Arc<Value>,
    /// Pointer of the resource root inside `document`
    pub base_pointer: String,
    pub draft: DraftVersion,
}

impl Resource {
    pub fn root(&self) -> Option<&Value> {
        self.document.pointer(&self.base_pointer)
    }
}

/// Where a fragment lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentNode {
    pub resource_uri: String,
    /// Pointer relative to the resource root
    pub pointer: String,
    /// Pointer relative to the enclosing document
    pub document_pointer: String,
}

/// A resolved position inside a resource
#[derive(Debug, Clone)]
pub struct Located<'a> {
    pub resource_uri: String,
    pub pointer: String,
    pub value: &'a Value,
}

#[derive(Debug, Default)]
pub struct FragmentArena {
    nodes: Vec<FragmentNode>,
    node_index: HashMap<(String, String), NodeId>,
    occurrences: Vec<(NodeId, String)>,
    occurrence_index: HashMap<(NodeId, String), OccurrenceId>,
    resources: HashMap<String, Resource>,
}

impl FragmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource; the first registration of a URI wins
    pub fn register_resource(
        &mut self,
        uri: &str,
        document: Arc<Value>,
        base_pointer: &str,
        draft: DraftVersion,
    ) {
        self.resources.entry(uri.to_string()).or_insert_with(|| Resource {
            uri: uri.to_string(),
            document,
            base_pointer: base_pointer.to_string(),
            draft,
        });
    }

    pub fn resource(&self, uri: &str) -> Option<&Resource> {
        self.resources.get(uri)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn has_resource(&self, uri: &str) -> bool {
        self.resources.contains_key(uri)
    }

    pub fn intern_node(&mut self, resource_uri: &str, pointer: &str, document_pointer: &str) -> NodeId {
        let key = (resource_uri.to_string(), pointer.to_string());
        if let Some(id) = self.node_index.get(&key) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(FragmentNode {
            resource_uri: resource_uri.to_string(),
            pointer: pointer.to_string(),
            document_pointer: document_pointer.to_string(),
        });
        self.node_index.insert(key, id);
        id
    }

    pub fn intern_occurrence(&mut self, node: NodeId, key: &str) -> OccurrenceId {
        let index_key = (node, key.to_string());
        if let Some(id) = self.occurrence_index.get(&index_key) {
            return *id;
        }
        let id = OccurrenceId(self.occurrences.len());
        self.occurrences.push((node, key.to_string()));
        self.occurrence_index.insert(index_key, id);
        id
    }

    /// Node registered for a position, if traversal ever visited it
    pub fn lookup(&self, resource_uri: &str, pointer: &str) -> Option<NodeId> {
        self.node_index
            .get(&(resource_uri.to_string(), pointer.to_string()))
            .copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&FragmentNode> {
        self.nodes.get(id.0)
    }

    /// Current JSON value of a fragment
    pub fn value(&self, id: NodeId) -> Option<&Value> {
        let node = self.nodes.get(id.0)?;
        let resource = self.resources.get(&node.resource_uri)?;
        resource.document.pointer(&node.document_pointer)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Move one reference token down from `from`, switching resource when the
    /// child declares its own registered `$id`
    pub fn step<'a>(&self, from: &Located<'a>, token: &str) -> Option<Located<'a>> {
        let child = match from.value {
            Value::Object(map) => map.get(token)?,
            Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };

        if let Some(id) = child.get("$id").and_then(Value::as_str) {
            let (nested, _) = defrag(&join(&from.resource_uri, id));
            if nested != from.resource_uri && self.resources.contains_key(&nested) {
                return Some(Located {
                    resource_uri: nested,
                    pointer: String::new(),
                    value: child,
                });
            }
        }

        Some(Located {
            resource_uri: from.resource_uri.clone(),
            pointer: pointer_child(&from.pointer, token),
            value: child,
        })
    }

    /// Resolve an absolute reference (`uri`, `uri#/json/pointer` or `uri#anchor`)
    pub fn locate(&self, reference: &str) -> Option<Located<'_>> {
        let (plain, fragment) = defrag(reference);
        let resource = self.resources.get(&plain)?;
        let root = Located {
            resource_uri: plain.clone(),
            pointer: String::new(),
            value: resource.root()?,
        };

        let fragment = fragment.map(|f| decode_fragment(&f)).unwrap_or_default();
        if fragment.is_empty() {
            return Some(root);
        }
        if fragment.starts_with('/') {
            let mut current = root;
            for token in pointer_tokens(&fragment) {
                current = self.step(&current, &token)?;
            }
            return Some(current);
        }
        self.find_anchor(root, &fragment)
    }

    fn find_anchor<'a>(&self, from: Located<'a>, anchor: &str) -> Option<Located<'a>> {
        let wanted = format!("{}#{}", from.resource_uri, anchor);
        if let Some(id) = from.value.get("$id").and_then(Value::as_str) {
            if join(&from.resource_uri, id) == wanted {
                return Some(from);
            }
        }
        let tokens: Vec<String> = match from.value {
            Value::Object(map) => map.keys().cloned().collect(),
            Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => return None,
        };
        for token in tokens {
            if let Some(child) = self.step(&from, &token) {
                if child.resource_uri != from.resource_uri {
                    continue;
                }
                if let Some(found) = self.find_anchor(child, anchor) {
                    return Some(found);
                }
            }
        }
        None
    }
}
