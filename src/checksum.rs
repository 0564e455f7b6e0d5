//! Content hashes for schemas and documents

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;

use crate::key_path::canonical_json;

/// SHA-1 of the canonical JSON serialization of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha1::digest(data)))
    }

    /// Compute the hash of a JSON value (sorted keys, compact separators)
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_bytes(canonical_json(value).as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that a JSON value matches this hash
    pub fn verify_json(&self, value: &serde_json::Value) -> bool {
        Self::from_json(value) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable file name for a cached resource identified by `key` (SHA-256 hex)
pub fn cache_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": [1, 2]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": [1, 2], "b": 1}"#).unwrap();
        assert_eq!(ContentHash::from_json(&a), ContentHash::from_json(&b));
    }

    #[test]
    fn test_hash_is_sha1_of_canonical_form() {
        let value = json!({"b": 1, "a": "x"});
        let expected = ContentHash::from_bytes(br#"{"a":"x","b":1}"#);
        assert_eq!(ContentHash::from_json(&value), expected);
        assert_eq!(expected.as_str().len(), 40);
    }

    #[test]
    fn test_hash_verification() {
        let value = json!({"name": "test"});
        let hash = ContentHash::from_json(&value);
        assert!(hash.verify_json(&value));
        assert!(!hash.verify_json(&json!({"name": "other"})));
    }

    #[test]
    fn test_cache_key_is_stable() {
        assert_eq!(cache_key("http://x/"), cache_key("http://x/"));
        assert_ne!(cache_key("http://x/"), cache_key("http://y/"));
        assert_eq!(cache_key("a").len(), 64);
    }
}
