//! Resolved schema export
//!
//! Produces a copy of a schema where every `$ref` is replaced by its target.
//! A reference that would re-enter a target already being inlined on the
//! current path is left as-is, so recursive schemas stay finite.

use serde_json::{Map, Value};

use super::arena::FragmentArena;
use crate::uri::{defrag, join};

/// Inline every resolvable `$ref` of the resource registered under `uri`
pub fn inline_references(arena: &FragmentArena, uri: &str) -> Option<Value> {
    let root = arena.resource(uri)?.root()?;
    let mut active = vec![uri.to_string()];
    Some(inline_value(arena, root, uri, &mut active))
}

fn inline_value(arena: &FragmentArena, value: &Value, base: &str, active: &mut Vec<String>) -> Value {
    match value {
        Value::Object(map) => {
            let mut base = base.to_string();
            if let Some(id) = map.get("$id").and_then(Value::as_str) {
                base = defrag(&join(&base, id)).0;
            }

            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                let target = join(&base, reference);
                let target_key = match defrag(&target) {
                    (plain, Some(fragment)) if !fragment.is_empty() => format!("{plain}#{fragment}"),
                    (plain, _) => plain,
                };
                if active.contains(&target_key) {
                    return value.clone();
                }
                let Some(located) = arena.locate(&target) else {
                    return value.clone();
                };
                active.push(target_key);
                let inlined = inline_value(arena, located.value, &located.resource_uri, active);
                active.pop();
                return inlined;
            }

            let inlined: Map<String, Value> = map
                .iter()
                .map(|(key, child)| (key.clone(), inline_value(arena, child, &base, active)))
                .collect();
            Value::Object(inlined)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| inline_value(arena, item, base, active))
                .collect(),
        ),
        other => other.clone(),
    }
}
