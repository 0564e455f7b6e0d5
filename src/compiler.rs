//! Schema compilation
//!
//! - Draft detection from `$schema`
//! - Meta-schemas embedded with `include_dir`, augmented with the syntax of
//!   every enabled extension keyword
//! - A local `$ref` resolver serving loaded schemas (never the network)
//! - Compiled document validators and cached per-fragment branch validators

use include_dir::{include_dir, Dir};
use jsonschema::{Draft, JSONSchema, SchemaResolver, SchemaResolverError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use url::Url;

use crate::error::{ErrorReason, ReportError, Result, ValidatorError};
use crate::extensions::ExtensionKind;
use crate::uri::{defrag, encode_fragment};

static METASCHEMAS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/src/metaschemas");

/// JSON Schema drafts accepted in `$schema`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DraftVersion {
    Draft4,
    Draft6,
    Draft7,
}

impl DraftVersion {
    pub const ALL: [DraftVersion; 3] = [Self::Draft4, Self::Draft6, Self::Draft7];

    /// Recognize a `$schema` value (schema or hyper-schema, with or without `#`)
    pub fn from_schema_uri(uri: &str) -> Option<Self> {
        match uri.trim_end_matches('#') {
            "http://json-schema.org/draft-04/schema" | "http://json-schema.org/draft-04/hyper-schema" => {
                Some(Self::Draft4)
            }
            "http://json-schema.org/draft-06/schema" | "http://json-schema.org/draft-06/hyper-schema" => {
                Some(Self::Draft6)
            }
            "http://json-schema.org/draft-07/schema" | "http://json-schema.org/draft-07/hyper-schema" => {
                Some(Self::Draft7)
            }
            _ => None,
        }
    }

    /// Canonical URI of the draft meta-schema (no fragment)
    pub fn meta_schema_uri(self) -> &'static str {
        match self {
            Self::Draft4 => "http://json-schema.org/draft-04/schema",
            Self::Draft6 => "http://json-schema.org/draft-06/schema",
            Self::Draft7 => "http://json-schema.org/draft-07/schema",
        }
    }

    pub fn as_jsonschema(self) -> Draft {
        match self {
            Self::Draft4 => Draft::Draft4,
            Self::Draft6 => Draft::Draft6,
            Self::Draft7 => Draft::Draft7,
        }
    }

    /// Keyword holding schema identifiers in this draft
    pub fn id_keyword(self) -> &'static str {
        match self {
            Self::Draft4 => "id",
            Self::Draft6 | Self::Draft7 => "$id",
        }
    }

    fn file_name(self) -> String {
        format!("{self}.json")
    }

    /// The unmodified draft meta-schema
    pub fn meta_schema(self) -> Result<Value> {
        let file = METASCHEMAS
            .get_file(self.file_name())
            .ok_or_else(|| ValidatorError::MetaSchema {
                draft: self.to_string(),
                reason: "meta-schema is not embedded".to_string(),
            })?;
        Ok(serde_json::from_slice(file.contents())?)
    }
}

impl fmt::Display for DraftVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft4 => write!(f, "draft-04"),
            Self::Draft6 => write!(f, "draft-06"),
            Self::Draft7 => write!(f, "draft-07"),
        }
    }
}

/// Fold the syntax of every extension keyword into the meta-schema `properties`
///
/// A keyword colliding with an existing property is merged through `anyOf`.
/// The result gets its own identifier so that its `#` references point back
/// to the augmented document rather than to the stock draft.
pub fn augment_meta_schema(meta: &Value, draft: DraftVersion, kinds: &[ExtensionKind]) -> Value {
    let mut augmented = kinds.iter().fold(meta.clone(), |mut acc, kind| {
        if let Some(root) = acc.as_object_mut() {
            let properties = root
                .entry("properties")
                .or_insert_with(|| json!({}));
            if let (Some(properties), Value::Object(fragment)) =
                (properties.as_object_mut(), kind.schema_fragment())
            {
                for (keyword, syntax) in fragment {
                    let merged = match properties.remove(&keyword) {
                        Some(existing) => json!({"anyOf": [existing, syntax]}),
                        None => syntax,
                    };
                    properties.insert(keyword, merged);
                }
            }
        }
        acc
    });

    if let Some(root) = augmented.as_object_mut() {
        root.insert(
            draft.id_keyword().to_string(),
            Value::String(format!(
                "https://extended-json-validator.invalid/{draft}/schema#"
            )),
        );
    }
    augmented
}

/// Serves `$ref` targets from the loaded schema set
/// Base the validator resolves relative ids and references against
pub const RELATIVE_ID_BASE: &str = "json-schema:///";

/// Copy of `schema` whose relative root id is made absolute, if it has one
fn anchor_relative_id(schema: &Value, draft: DraftVersion) -> Option<Value> {
    let keyword = draft.id_keyword();
    let id = schema.get(keyword)?.as_str()?;
    if Url::parse(id).is_ok() {
        return None;
    }
    let absolute = Url::parse(RELATIVE_ID_BASE).ok()?.join(id).ok()?;
    let mut anchored = schema.clone();
    if let Some(root) = anchored.as_object_mut() {
        root.insert(keyword.to_string(), Value::String(absolute.to_string()));
    }
    Some(anchored)
}

#[derive(Clone, Default)]
pub struct LocalResolver {
    documents: Arc<RwLock<HashMap<String, Arc<Value>>>>,
}

impl LocalResolver {
    pub fn insert(&self, uri: &str, document: Arc<Value>) {
        let (plain, _) = defrag(uri);
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.entry(plain).or_insert(document);
    }

    pub fn get(&self, uri: &str) -> Option<Arc<Value>> {
        let (plain, _) = defrag(uri);
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents
            .get(&plain)
            .or_else(|| {
                // Relative schema ids end up below the validator's default base
                plain
                    .strip_prefix(RELATIVE_ID_BASE)
                    .and_then(|relative| documents.get(relative))
            })
            .cloned()
    }
}

impl fmt::Debug for LocalResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.documents.read().map(|d| d.len()).unwrap_or_default();
        f.debug_struct("LocalResolver").field("documents", &count).finish()
    }
}

impl SchemaResolver for LocalResolver {
    fn resolve(
        &self,
        _root_schema: &Value,
        url: &Url,
        _original_reference: &str,
    ) -> std::result::Result<Arc<Value>, SchemaResolverError> {
        self.get(url.as_str())
            .ok_or_else(|| anyhow::anyhow!("Schema {} was not loaded", url))
    }
}

/// Compiles meta-schemas, schemas and branch validators against one resolver
pub struct SchemaCompiler {
    kinds: Vec<ExtensionKind>,
    resolver: LocalResolver,
    meta_validators: HashMap<DraftVersion, JSONSchema>,
    branches: HashMap<(String, String), Option<Arc<JSONSchema>>>,
}

impl SchemaCompiler {
    pub fn new(kinds: &[ExtensionKind]) -> Result<Self> {
        let resolver = LocalResolver::default();
        for draft in DraftVersion::ALL {
            resolver.insert(draft.meta_schema_uri(), Arc::new(draft.meta_schema()?));
        }
        Ok(Self {
            kinds: kinds.to_vec(),
            resolver,
            meta_validators: HashMap::new(),
            branches: HashMap::new(),
        })
    }

    pub fn resolver(&self) -> &LocalResolver {
        &self.resolver
    }

    /// Validate a schema against its augmented meta-schema
    ///
    /// Every failure becomes one `schema_error` carrying the offending pointer.
    pub fn check_schema(&mut self, schema: &Value, draft: DraftVersion) -> Result<Vec<ReportError>> {
        if !self.meta_validators.contains_key(&draft) {
            let augmented = augment_meta_schema(&draft.meta_schema()?, draft, &self.kinds);
            let compiled = JSONSchema::options()
                .with_draft(draft.as_jsonschema())
                .with_resolver(self.resolver.clone())
                .compile(&augmented)
                .map_err(|e| ValidatorError::MetaSchema {
                    draft: draft.to_string(),
                    reason: e.to_string(),
                })?;
            self.meta_validators.insert(draft, compiled);
        }
        let Some(meta) = self.meta_validators.get(&draft) else {
            return Ok(Vec::new());
        };

        let errors = match meta.validate(schema) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    ReportError::new(
                        ErrorReason::SchemaError,
                        format!("Path: {} . Message: {}", path, e),
                    )
                    .with_path(path)
                })
                .collect(),
        };
        Ok(errors)
    }

    /// Compile the validator documents are checked with
    ///
    /// A relative root id is anchored below [`RELATIVE_ID_BASE`] in the
    /// compiled copy; the resolver maps such URIs back to the relative ids.
    pub fn compile(&self, schema: &Value, draft: DraftVersion) -> std::result::Result<JSONSchema, String> {
        let anchored = anchor_relative_id(schema, draft);
        JSONSchema::options()
            .with_draft(draft.as_jsonschema())
            .with_resolver(self.resolver.clone())
            .compile(anchored.as_ref().unwrap_or(schema))
            .map_err(|e| e.to_string())
    }

    /// Does `instance` satisfy the fragment at `resource_uri#pointer`?
    ///
    /// Used to pick the branches of `anyOf`/`oneOf`/`if` that govern a value.
    /// Fragments that cannot be compiled count as not satisfied.
    pub fn branch_is_valid(
        &mut self,
        resource_uri: &str,
        pointer: &str,
        draft: DraftVersion,
        instance: &Value,
    ) -> bool {
        let key = (resource_uri.to_string(), pointer.to_string());
        if !self.branches.contains_key(&key) {
            let wrapper = json!({"$ref": format!("{}#{}", resource_uri, encode_fragment(pointer))});
            let compiled = self.compile(&wrapper, draft).ok().map(Arc::new);
            self.branches.insert(key.clone(), compiled);
        }
        self.branches
            .get(&key)
            .and_then(Option::as_ref)
            .map_or(false, |validator| validator.is_valid(instance))
    }

    /// Drop cached branch validators (the schema set changed)
    pub fn reset_branches(&mut self) {
        self.branches.clear();
    }
}

impl fmt::Debug for SchemaCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCompiler")
            .field("kinds", &self.kinds)
            .field("resolver", &self.resolver)
            .field("branches", &self.branches.len())
            .finish()
    }
}
