//! Key path evaluation
//!
//! Materializes dotted member paths against a document and turns the
//! materialized column values into canonical key strings.
//!
//! ## Path syntax
//!
//! - `a.b.c` walks object members
//! - `a[].b` flattens the array `a` and continues on every element
//! - `a[2].b` selects one element of `a`
//! - `.` or the empty path denote the whole document
//!
//! Missing members and out-of-range indices prune the branch silently.

use serde_json::Value;

/// Which part of a value forms a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMembers {
    /// The whole value is the key (`true` in a key declaration)
    Whole,
    /// One column per member path
    Paths(Vec<String>),
}

impl KeyMembers {
    /// Parse the `members` part of a key declaration
    ///
    /// `true` means the whole value, a non-empty array of strings lists member
    /// paths. Anything else (including `false`) declares nothing.
    pub fn from_declaration(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Self::Whole),
            Value::Array(items) if !items.is_empty() => {
                let paths: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                paths.map(Self::Paths)
            }
            _ => None,
        }
    }

    /// Compute the canonical key strings this definition yields for `value`
    ///
    /// With a `scope`, every key is additionally qualified by it (used for
    /// per-document keys).
    ///
    /// The encoding follows the declared shape only: a single-column key is
    /// the canonical JSON of each value, a composite (or scoped) key is a
    /// canonical JSON array. A multi-valued column therefore yields the same
    /// strings its values would yield one at a time.
    pub fn key_strings(&self, value: &Value, scope: Option<&str>) -> Vec<String> {
        let mut columns = match self {
            Self::Whole => vec![vec![leaf_value(value)]],
            Self::Paths(paths) => key_values(value, paths),
        };
        if let Some(scope) = scope {
            columns.insert(0, vec![Value::String(scope.to_string())]);
        }

        match columns.as_slice() {
            [single] => single.iter().map(canonical_json).collect(),
            _ => gen_key_strings(&columns),
        }
    }

    /// Key string of one externally provided id
    pub fn provided_key(id: &str) -> String {
        canonical_json(&Value::String(id.to_string()))
    }
}

/// Atomic JSON values can be compared directly
pub fn is_atomic(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// Serialize a value with sorted object keys and no insignificant whitespace
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// One parsed path step: member name plus optional array selector
#[derive(Debug, PartialEq, Eq)]
enum Selector {
    None,
    Flatten,
    Index(usize),
}

fn parse_step(step: &str) -> (&str, Selector) {
    if let Some(head) = step.strip_suffix(']') {
        if let Some(open) = head.rfind('[') {
            let (name, index) = (&head[..open], &head[open + 1..]);
            if !name.is_empty() {
                if index.is_empty() {
                    return (name, Selector::Flatten);
                }
                let canonical = index == "0" || !index.starts_with('0');
                if canonical && index.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(i) = index.parse() {
                        return (name, Selector::Index(i));
                    }
                }
            }
        }
    }
    (step, Selector::None)
}

fn leaf_value(value: &Value) -> Value {
    if is_atomic(value) {
        value.clone()
    } else {
        Value::String(canonical_json(value))
    }
}

/// Materialize `path` against `document`
///
/// Arrays reached without an explicit index are flattened. Non-atomic leaves
/// are replaced by their canonical JSON serialization.
pub fn materialize(document: &Value, path: &str) -> Vec<Value> {
    let mut current: Vec<&Value> = vec![document];

    if path != "." && !path.is_empty() {
        for step in path.split('.') {
            let (name, selector) = parse_step(step);
            let mut next = Vec::new();
            for obj in current {
                let Some(value) = obj.as_object().and_then(|map| map.get(name)) else {
                    continue;
                };
                match (value, &selector) {
                    (Value::Array(items), Selector::Index(i)) => {
                        if let Some(item) = items.get(*i) {
                            next.push(item);
                        }
                    }
                    (Value::Array(items), _) => next.extend(items.iter()),
                    (_, Selector::Index(_)) => {}
                    (other, _) => next.push(other),
                }
            }
            current = next;
        }
    }

    current.into_iter().map(leaf_value).collect()
}

/// Materialize every member path, one column per member
pub fn key_values(document: &Value, members: &[String]) -> Vec<Vec<Value>> {
    members
        .iter()
        .map(|member| materialize(document, member))
        .collect()
}

/// Cartesian product of the columns, each combination as a canonical JSON array
///
/// A key with a missing component never contributes a value, so the result is
/// empty as soon as any column is empty.
pub fn gen_key_strings(columns: &[Vec<Value>]) -> Vec<String> {
    if columns.is_empty() || columns.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    let mut combos: Vec<Vec<&Value>> = vec![Vec::new()];
    for column in columns {
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                column.iter().map(move |value| {
                    let mut combo = prefix.clone();
                    combo.push(value);
                    combo
                })
            })
            .collect();
    }

    combos
        .into_iter()
        .map(|combo| canonical_json(&Value::Array(combo.into_iter().cloned().collect())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_materialize_plain_path_yields_at_most_one() {
        let doc = json!({"a": {"b": 3}});
        assert_eq!(materialize(&doc, "a.b"), vec![json!(3)]);
        assert!(materialize(&doc, "a.c").is_empty());
        assert!(materialize(&doc, "x.b").is_empty());
    }

    #[test]
    fn test_materialize_flattens_arrays() {
        let doc = json!({"a": [{"b": 1}, {"c": 2}, {"b": 3}]});
        assert_eq!(materialize(&doc, "a[].b"), vec![json!(1), json!(3)]);
        // Arrays are flattened even without the explicit wildcard
        assert_eq!(materialize(&doc, "a.b"), vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_materialize_index_selection() {
        let doc = json!({"a": [{"b": 1}, {"b": 2}]});
        assert_eq!(materialize(&doc, "a[1].b"), vec![json!(2)]);
        assert!(materialize(&doc, "a[7].b").is_empty());
        assert_eq!(materialize(&doc, "a[10].b"), Vec::<Value>::new());
    }

    #[test]
    fn test_materialize_whole_document_and_leaf_canonicalization() {
        let doc = json!({"z": 1, "a": [true]});
        assert_eq!(materialize(&doc, "."), vec![json!(r#"{"a":[true],"z":1}"#)]);
        assert_eq!(materialize(&doc, ""), materialize(&doc, "."));
    }

    #[test]
    fn test_parse_step_rejects_leading_zeroes() {
        assert_eq!(parse_step("a[01]"), ("a[01]", Selector::None));
        assert_eq!(parse_step("a[0]"), ("a", Selector::Index(0)));
        assert_eq!(parse_step("a[12]"), ("a", Selector::Index(12)));
        assert_eq!(parse_step("a[]"), ("a", Selector::Flatten));
    }

    #[test]
    fn test_gen_key_strings_product() {
        let columns = vec![vec![json!("x"), json!("y")], vec![json!(1)]];
        assert_eq!(gen_key_strings(&columns), vec![r#"["x",1]"#, r#"["y",1]"#]);
    }

    #[test]
    fn test_gen_key_strings_empty_column() {
        let columns = vec![vec![json!("x")], vec![]];
        assert!(gen_key_strings(&columns).is_empty());
        assert!(gen_key_strings(&[]).is_empty());
    }

    #[test]
    fn test_key_strings_ignore_member_order() {
        let a: Value = serde_json::from_str(r#"{"k": {"p": 1, "q": 2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"k": {"q": 2, "p": 1}}"#).unwrap();
        let members = KeyMembers::Paths(vec!["k".to_string()]);
        assert_eq!(members.key_strings(&a, None), members.key_strings(&b, None));
    }

    #[test]
    fn test_key_strings_atomic_shortcut_and_scope() {
        let members = KeyMembers::Paths(vec!["id".to_string()]);
        let doc = json!({"id": "x"});
        assert_eq!(members.key_strings(&doc, None), vec![r#""x""#]);
        assert_eq!(members.key_strings(&doc, Some("d1.json")), vec![r#"["d1.json","x"]"#]);
    }

    #[test]
    fn test_single_column_encoding_ignores_value_count() {
        let members = KeyMembers::Paths(vec!["refs[]".to_string()]);
        let one = json!({"refs": ["a"]});
        let many = json!({"refs": ["a", "b"]});
        assert_eq!(members.key_strings(&one, None), vec![r#""a""#]);
        assert_eq!(members.key_strings(&many, None), vec![r#""a""#, r#""b""#]);
        assert_eq!(
            KeyMembers::Paths(vec!["id".to_string()]).key_strings(&json!({"id": "a"}), None),
            vec![KeyMembers::provided_key("a")]
        );
    }

    #[test]
    fn test_composite_keys_stay_tuples() {
        let members = KeyMembers::Paths(vec!["a".to_string(), "b[]".to_string()]);
        let doc = json!({"a": 1, "b": ["x"]});
        assert_eq!(members.key_strings(&doc, None), vec![r#"[1,"x"]"#]);
    }

    #[test]
    fn test_members_from_declaration() {
        assert_eq!(KeyMembers::from_declaration(&json!(true)), Some(KeyMembers::Whole));
        assert_eq!(KeyMembers::from_declaration(&json!(false)), None);
        assert_eq!(KeyMembers::from_declaration(&json!([])), None);
        assert_eq!(
            KeyMembers::from_declaration(&json!(["a", "b.c"])),
            Some(KeyMembers::Paths(vec!["a".into(), "b.c".into()]))
        );
    }
}
