//! Cross-schema `$ref` graph
//!
//! Builds a petgraph `DiGraph` with one node per schema resource and one edge
//! per `$ref` that leaves its resource (plus an edge from every resource to
//! the nested `$id` resources it embeds). Propagation merges, for every
//! schema, the feature graphs of everything reachable from it, so extension
//! bootstrap sees features inherited through `$ref`. Depth-first search keeps
//! a visited set, so reference cycles terminate.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use super::arena::FragmentArena;
use super::traverse::{FeatureGraph, REF_KEYWORD};
use crate::uri::{defrag, join};

#[derive(Debug, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    /// Targets that no loaded resource answers to
    unresolved: BTreeSet<String>,
}

impl ReferenceGraph {
    /// Build the graph from flattened per-resource feature graphs
    pub fn build(
        graphs: &BTreeMap<String, FeatureGraph>,
        embedded: &[(String, String)],
        arena: &FragmentArena,
    ) -> Self {
        let mut refs = Self::default();
        for uri in graphs.keys() {
            refs.node(uri);
        }

        for (uri, graph) in graphs {
            for location in graph.locations(REF_KEYWORD) {
                let Some(reference) = arena
                    .value(location.node)
                    .and_then(|node| node.get(REF_KEYWORD))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let (target, _) = defrag(&join(&location.schema_uri, reference));
                if target == *uri {
                    continue;
                }
                if !graphs.contains_key(&target) {
                    if refs.unresolved.insert(target.clone()) {
                        warn!("$ref target {} (from {}) is not a loaded schema", target, uri);
                    }
                    continue;
                }
                refs.edge(uri, &target);
            }
        }

        for (parent, child) in embedded {
            if graphs.contains_key(parent) && graphs.contains_key(child) {
                refs.edge(parent, child);
            }
        }

        for cycle in refs.cycles() {
            debug!("$ref cycle between schemas: {}", cycle.join(" -> "));
        }
        refs
    }

    fn node(&mut self, uri: &str) -> NodeIndex {
        if let Some(idx) = self.indices.get(uri) {
            return *idx;
        }
        let idx = self.graph.add_node(uri.to_string());
        self.indices.insert(uri.to_string(), idx);
        idx
    }

    fn edge(&mut self, from: &str, to: &str) {
        let a = self.node(from);
        let b = self.node(to);
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    /// Every resource reachable from `uri` through `$ref`, excluding itself
    pub fn reachable(&self, uri: &str) -> Vec<String> {
        let Some(start) = self.indices.get(uri) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, *start);
        let mut found = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != *start {
                found.push(self.graph[idx].clone());
            }
        }
        found
    }

    /// Groups of schemas that reference each other in a cycle
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<String> =
                    scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
                members.sort();
                members
            })
            .collect();
        groups.sort();
        groups
    }

    pub fn unresolved(&self) -> &BTreeSet<String> {
        &self.unresolved
    }
}

/// Merge into every schema's graph the graphs of everything it reaches
pub fn propagate(
    graphs: &BTreeMap<String, FeatureGraph>,
    refs: &ReferenceGraph,
) -> BTreeMap<String, FeatureGraph> {
    graphs
        .iter()
        .map(|(uri, graph)| {
            let mut merged = graph.clone();
            for target in refs.reachable(uri) {
                if let Some(inherited) = graphs.get(&target) {
                    merged.merge(inherited);
                }
            }
            (uri.clone(), merged)
        })
        .collect()
}
