//! URI and JSON Pointer helpers shared by the resolver, the compiler and the walker

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Resolve `reference` against `base`
///
/// An absolute base gets a proper RFC 3986 join. A relative base can only be
/// rewritten: absolute references win, fragment-only references keep the
/// base, anything else replaces it.
pub fn join(base: &str, reference: &str) -> String {
    if let Ok(base_url) = Url::parse(base) {
        if let Ok(joined) = base_url.join(reference) {
            return joined.to_string();
        }
    }
    if Url::parse(reference).is_ok() {
        return reference.to_string();
    }
    if let Some(fragment) = reference.strip_prefix('#') {
        let (plain, _) = defrag(base);
        return format!("{plain}#{fragment}");
    }
    reference.to_string()
}

/// Split a URI into its fragment-less part and the fragment (if any)
pub fn defrag(uri: &str) -> (String, Option<String>) {
    match uri.split_once('#') {
        Some((plain, fragment)) => (plain.to_string(), Some(fragment.to_string())),
        None => (uri.to_string(), None),
    }
}

/// Last non-empty path segment of a URI (`https://x/a/b.json` -> `b.json`)
pub fn last_path_segment(uri: &str) -> &str {
    let (plain, _) = uri.split_once('#').unwrap_or((uri, ""));
    plain
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(plain)
}

/// Escape one JSON Pointer reference token
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape one JSON Pointer reference token
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Append a reference token to a JSON Pointer
pub fn pointer_child(pointer: &str, token: &str) -> String {
    format!("{}/{}", pointer, escape_token(token))
}

/// Split a JSON Pointer into unescaped reference tokens
pub fn pointer_tokens(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(unescape_token)
        .collect()
}

/// Bytes left unescaped in fragments: unreserved characters plus the pointer
/// separator and a few sub-delimiters common in schema keywords
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b'$')
    .remove(b'@')
    .remove(b':');

/// Percent-decode a URI fragment so it can be used as a JSON Pointer
pub fn decode_fragment(fragment: &str) -> String {
    percent_decode_str(fragment).decode_utf8_lossy().into_owned()
}

/// Percent-encode a JSON Pointer so it can be used as a URI fragment
pub fn encode_fragment(pointer: &str) -> String {
    utf8_percent_encode(pointer, FRAGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_absolute_base() {
        assert_eq!(
            join("https://example.org/schemas/a.json", "b.json"),
            "https://example.org/schemas/b.json"
        );
        assert_eq!(
            join("https://example.org/schemas/a.json", "#/definitions/x"),
            "https://example.org/schemas/a.json#/definitions/x"
        );
    }

    #[test]
    fn test_join_relative_base() {
        assert_eq!(join("S2", "S1"), "S1");
        assert_eq!(join("S2", "#/definitions/x"), "S2#/definitions/x");
        assert_eq!(join("S2", "https://x.org/a"), "https://x.org/a");
    }

    #[test]
    fn test_defrag() {
        assert_eq!(defrag("a.json#/x"), ("a.json".to_string(), Some("/x".to_string())));
        assert_eq!(defrag("a.json"), ("a.json".to_string(), None));
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(last_path_segment("https://x.org/a/people.json"), "people.json");
        assert_eq!(last_path_segment("https://x.org/a/people/"), "people");
        assert_eq!(last_path_segment("S1"), "S1");
    }

    #[test]
    fn test_pointer_tokens_roundtrip() {
        let pointer = pointer_child(&pointer_child("", "a/b"), "c~d");
        assert_eq!(pointer, "/a~1b/c~0d");
        assert_eq!(pointer_tokens(&pointer), vec!["a/b", "c~d"]);
        assert!(pointer_tokens("").is_empty());
    }

    #[test]
    fn test_fragment_encoding() {
        assert_eq!(encode_fragment("/properties/a b"), "/properties/a%20b");
        assert_eq!(decode_fragment("/properties/a%20b"), "/properties/a b");
        assert_eq!(encode_fragment("/definitions/$id~1x"), "/definitions/$id~1x");
        assert_eq!(decode_fragment("/%E2%82%ACuro%2"), "/\u{20ac}uro%2");
    }
}
