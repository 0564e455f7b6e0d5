//! Schema Feature Graph
//!
//! Resolver side of the validator: which trigger keywords occur where, across
//! every loaded schema, and how schemas reach each other through `$ref`.
//!
//! - [`arena`]: stable integer ids for schema fragments and key occurrences
//! - [`traverse`]: per-document feature collection (`$id` rescoping, `$ref`
//!   sibling-ignoring)
//! - [`references`]: petgraph `$ref` graph, transitive propagation, SCC cycles
//! - [`resolved`]: `$ref`-inlined schema export

pub mod arena;
pub mod references;
pub mod resolved;
pub mod traverse;

pub use arena::{FragmentArena, FragmentNode, Located, NodeId, OccurrenceId, Resource};
pub use references::{propagate, ReferenceGraph};
pub use resolved::inline_references;
pub use traverse::{
    traverse, FeatureGraph, FeatureLocation, MalformedOccurrence, TraversalOutcome, REF_KEYWORD,
};
