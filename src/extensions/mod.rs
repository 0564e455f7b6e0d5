//! Extension keywords
//!
//! Every relational keyword (`index`, `unique`, `primary_key`,
//! `foreign_keys`, `join_keys`) is an [`ExtensionKind`] whose instances
//! implement [`FeatureValidator`]. One instance of every enabled kind is bound
//! to every loaded schema.
//!
//! ## Lifecycle
//!
//! 1. `schema_fragment` is folded into the draft meta-schema
//! 2. `bootstrap` runs once after loading, fed with the merged feature graph
//! 3. `validate` runs in pass 1 for every keyword hit of every document
//! 4. `get_context` snapshots are gathered, then `do_second_pass` runs
//! 5. `cleanup` clears per-run values and keeps bootstrap structure

pub mod index;
pub mod primary_key;
pub mod provider;
pub mod reference;
pub mod unique;

pub use index::{IndexKey, KeyDeclaration, KeyDefinition, KeyWorld};
pub use primary_key::PrimaryKey;
pub use provider::{KeyProviders, ProvidedKeys};
pub use reference::{RefDeclaration, RefDefinition, RefKey};
pub use unique::UniqueKey;

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::ValidatorConfig;
use crate::error::{ErrorReason, ReportError, Result, ValidatorError};
use crate::graph::{FeatureGraph, FragmentArena, NodeId};

/// The closed set of extension keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtensionKind {
    #[serde(rename = "index")]
    Index,
    #[serde(rename = "unique")]
    Unique,
    #[serde(rename = "primary_key")]
    PrimaryKey,
    #[serde(rename = "foreign_keys")]
    ForeignKey,
    #[serde(rename = "join_keys")]
    JoinKey,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 5] = [
        Self::Index,
        Self::Unique,
        Self::PrimaryKey,
        Self::ForeignKey,
        Self::JoinKey,
    ];

    /// Keyword that activates the extension on a schema node
    pub fn trigger_attribute(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Unique => "unique",
            Self::PrimaryKey => "primary_key",
            Self::ForeignKey => "foreign_keys",
            Self::JoinKey => "join_keys",
        }
    }

    /// Allowed syntax of the keyword value
    pub fn keyword_syntax(self) -> Value {
        match self {
            Self::Index | Self::Unique | Self::PrimaryKey => key_declaration_syntax(),
            Self::ForeignKey | Self::JoinKey => ref_declaration_syntax(),
        }
    }

    /// `{keyword: syntax}` fragment merged into the meta-schema `properties`
    pub fn schema_fragment(self) -> Value {
        let mut fragment = serde_json::Map::new();
        fragment.insert(self.trigger_attribute().to_string(), self.keyword_syntax());
        Value::Object(fragment)
    }

    /// Kind whose contexts a referential kind checks against
    pub fn referenced_kind(self) -> Option<ExtensionKind> {
        match self {
            Self::ForeignKey => Some(Self::PrimaryKey),
            Self::JoinKey => Some(Self::Index),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.trigger_attribute())
    }
}

fn member_list_syntax() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string", "minLength": 1},
        "uniqueItems": true,
        "minItems": 1
    })
}

fn key_declaration_syntax() -> Value {
    json!({
        "oneOf": [
            {"type": "boolean"},
            member_list_syntax(),
            {
                "type": "object",
                "properties": {
                    "members": {"oneOf": [{"type": "boolean"}, member_list_syntax()]},
                    "name": {"type": "string", "minLength": 1},
                    "limit_scope": {"type": "boolean", "default": false}
                },
                "required": ["members"],
                "additionalProperties": false
            }
        ]
    })
}

fn ref_declaration_syntax() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "schema_id": {"type": "string", "format": "uri-reference"},
                "members": {
                    "type": "array",
                    "items": {"type": "string", "minLength": 1},
                    "minItems": 1
                },
                "refers_to": {"type": "string", "minLength": 1}
            },
            "required": ["schema_id", "members"]
        }
    })
}

/// One place where a trigger keyword governs an instance value
#[derive(Debug, Clone, Copy)]
pub struct KeywordHit<'a> {
    /// Fragment carrying the keyword
    pub node: NodeId,
    /// Resource the fragment belongs to
    pub schema_uri: &'a str,
    /// Pointer of the fragment inside its resource
    pub node_path: &'a str,
    pub keyword_value: &'a Value,
    pub instance: &'a Value,
    pub instance_path: &'a str,
}

/// Read-only inputs of `bootstrap`
#[derive(Debug, Clone, Copy)]
pub struct BootstrapEnv<'a> {
    pub arena: &'a FragmentArena,
    /// URIs of every loaded schema
    pub loaded: &'a BTreeSet<String>,
    /// Source (file or label) of the schema being bootstrapped
    pub source: &'a str,
}

/// Accumulated key state of one extension instance, lent to pass 2
#[derive(Debug, Clone, Copy)]
pub struct NamedContext<'a> {
    pub kind: ExtensionKind,
    /// Schema the instance is bound to
    pub schema_uri: &'a str,
    pub world: &'a KeyWorld,
    pub provided: Option<&'a ProvidedKeys>,
}

/// Every context gathered by the engine before pass 2
#[derive(Debug, Default)]
pub struct GatheredContexts<'a> {
    by_kind: HashMap<ExtensionKind, Vec<NamedContext<'a>>>,
}

impl<'a> GatheredContexts<'a> {
    pub fn push(&mut self, context: NamedContext<'a>) {
        self.by_kind.entry(context.kind).or_default().push(context);
    }

    pub fn get(&self, kind: ExtensionKind) -> &[NamedContext<'a>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Result of `do_second_pass`
#[derive(Debug, Default, Clone)]
pub struct SecondPassOutcome {
    pub processed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    /// Errors attributed to the document that produced the offending value
    pub errors: Vec<(String, ReportError)>,
}

/// Contract every extension keyword implements
pub trait FeatureValidator {
    fn kind(&self) -> ExtensionKind;

    fn trigger_attribute(&self) -> &'static str {
        self.kind().trigger_attribute()
    }

    fn schema_fragment(&self) -> Value {
        self.kind().schema_fragment()
    }

    fn needs_bootstrapping(&self) -> bool {
        false
    }

    fn bootstrap(&mut self, _graph: &FeatureGraph, _env: &BootstrapEnv<'_>) -> Vec<ReportError> {
        Vec::new()
    }

    /// Check (and record) one governed value of `document`
    fn validate(&mut self, hit: &KeywordHit<'_>, document: &str) -> Vec<ReportError>;

    /// Drop everything recorded for `document` (failed schema guess)
    fn forget(&mut self, _document: &str) -> bool {
        false
    }

    fn needs_second_pass(&self) -> bool {
        false
    }

    fn do_second_pass(&self, _contexts: &GatheredContexts<'_>) -> SecondPassOutcome {
        SecondPassOutcome::default()
    }

    fn get_context(&self) -> Option<NamedContext<'_>> {
        None
    }

    fn warm_up_caches(&mut self) {}

    fn invalidate_caches(&mut self) {}

    fn cleanup(&mut self);
}

/// An extension instance bound to one schema
#[derive(Debug)]
pub enum Extension {
    Index(IndexKey),
    Unique(UniqueKey),
    PrimaryKey(PrimaryKey),
    ForeignKey(RefKey),
    JoinKey(RefKey),
}

impl Extension {
    pub fn new(kind: ExtensionKind, schema_uri: &str, config: &ValidatorConfig) -> Self {
        match kind {
            ExtensionKind::Index => Self::Index(IndexKey::new(schema_uri)),
            ExtensionKind::Unique => Self::Unique(UniqueKey::new(schema_uri)),
            ExtensionKind::PrimaryKey => Self::PrimaryKey(PrimaryKey::new(schema_uri, config)),
            ExtensionKind::ForeignKey => Self::ForeignKey(RefKey::foreign_key(schema_uri)),
            ExtensionKind::JoinKey => Self::JoinKey(RefKey::join_key(schema_uri)),
        }
    }

    pub fn as_validator(&self) -> &dyn FeatureValidator {
        match self {
            Self::Index(ext) => ext,
            Self::Unique(ext) => ext,
            Self::PrimaryKey(ext) => ext,
            Self::ForeignKey(ext) | Self::JoinKey(ext) => ext,
        }
    }

    pub fn as_validator_mut(&mut self) -> &mut dyn FeatureValidator {
        match self {
            Self::Index(ext) => ext,
            Self::Unique(ext) => ext,
            Self::PrimaryKey(ext) => ext,
            Self::ForeignKey(ext) | Self::JoinKey(ext) => ext,
        }
    }

    pub fn kind(&self) -> ExtensionKind {
        self.as_validator().kind()
    }
}

/// Enabled extension kinds, checked for trigger conflicts
#[derive(Debug, Clone)]
pub struct ExtensionRegistry {
    kinds: Vec<ExtensionKind>,
    by_trigger: BTreeMap<&'static str, ExtensionKind>,
}

impl ExtensionRegistry {
    /// Two kinds claiming the same trigger keyword is a fatal conflict
    pub fn new(kinds: &[ExtensionKind]) -> Result<Self> {
        let mut by_trigger = BTreeMap::new();
        for kind in kinds {
            let trigger = kind.trigger_attribute();
            if by_trigger.insert(trigger, *kind).is_some() {
                return Err(ValidatorError::DuplicateTrigger(trigger.to_string()));
            }
        }
        Ok(Self {
            kinds: kinds.to_vec(),
            by_trigger,
        })
    }

    pub fn kinds(&self) -> &[ExtensionKind] {
        &self.kinds
    }

    pub fn kind_for(&self, keyword: &str) -> Option<ExtensionKind> {
        self.by_trigger.get(keyword).copied()
    }

    pub fn triggers(&self) -> BTreeSet<String> {
        self.by_trigger.keys().map(|k| k.to_string()).collect()
    }

    /// Fresh extension instances for one schema
    pub fn instantiate(&self, schema_uri: &str, config: &ValidatorConfig) -> Vec<Extension> {
        self.kinds
            .iter()
            .map(|kind| Extension::new(*kind, schema_uri, config))
            .collect()
    }
}

/// Compiled keyword syntaxes, used to spot malformed occurrences
pub struct FragmentCheckers {
    compiled: HashMap<String, Arc<JSONSchema>>,
}

impl FragmentCheckers {
    pub fn new(registry: &ExtensionRegistry) -> Result<Self> {
        let mut compiled = HashMap::new();
        for kind in registry.kinds() {
            let syntax = kind.keyword_syntax();
            let schema = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&syntax)
                .map_err(|e| ValidatorError::ExtensionFragment {
                    keyword: kind.trigger_attribute().to_string(),
                    reason: e.to_string(),
                })?;
            compiled.insert(kind.trigger_attribute().to_string(), Arc::new(schema));
        }
        Ok(Self { compiled })
    }

    /// Unknown keywords are accepted
    pub fn accepts(&self, keyword: &str, value: &Value) -> bool {
        self.compiled
            .get(keyword)
            .map_or(true, |schema| schema.is_valid(value))
    }
}

impl std::fmt::Debug for FragmentCheckers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentCheckers")
            .field("keywords", &self.compiled.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Error returned when a keyword value cannot be interpreted at validation time
pub(crate) fn undeclared_key_error(keyword: &str, hit: &KeywordHit<'_>) -> ReportError {
    ReportError::new(
        ErrorReason::ErrIndex,
        format!(
            "Unusable '{}' declaration at {}{}",
            keyword, hit.schema_uri, hit.node_path
        ),
    )
    .with_path(hit.instance_path)
}
