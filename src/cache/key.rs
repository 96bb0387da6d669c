//! Cache key generation
//!
//! Item keys are `<ns>:<entity>:<id>`, list keys are
//! `<ns>:<entity>:list:<fingerprint>` where the fingerprint is a truncated
//! SHA-256 of the canonical (key-sorted) JSON encoding of the filters.

use std::fmt::{Display, Write as _};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::EntityType;

/// Application namespace prefixed to every key
pub const NAMESPACE: &str = "cep";

/// Fingerprint token used when a list query has no filters
const ALL_FILTER: &str = "all";

/// Bytes of the SHA-256 digest kept in a fingerprint (128 bits)
const FINGERPRINT_BYTES: usize = 16;

/// Builds namespaced cache keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(NAMESPACE)
    }
}

impl KeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `<ns>:<entity>:` - the prefix shared by every key of an entity type
    pub fn entity_prefix(&self, entity: EntityType) -> String {
        format!("{}:{}:", self.namespace, entity)
    }

    /// Key for a single entity: `<ns>:<entity>:<id>`
    pub fn entity_key(&self, entity: EntityType, id: impl Display) -> String {
        format!("{}:{}:{}", self.namespace, entity, id)
    }

    /// Key for a list query: `<ns>:<entity>:list:<fingerprint|all>`
    pub fn list_key(&self, entity: EntityType, filters: Option<&Value>) -> String {
        let token = match filters {
            Some(filters) if !is_empty_filter(filters) => fingerprint(filters),
            _ => ALL_FILTER.to_string(),
        };
        format!("{}:{}:list:{}", self.namespace, entity, token)
    }

    /// Full key for `key`, which may already be a built key for `entity`
    pub fn resolve(&self, entity: EntityType, key: &str) -> String {
        if key.starts_with(&self.entity_prefix(entity)) {
            key.to_string()
        } else {
            self.entity_key(entity, key)
        }
    }

    /// KEYS pattern matching everything to invalidate for `entity`/`id`.
    ///
    /// With an id the pattern is a prefix match on `<ns>:<entity>:<id>`, so
    /// keys of longer ids sharing that prefix are cleared too (`1` also
    /// removes `10`). Over-invalidation only costs a reload. The id is
    /// glob-escaped.
    pub fn invalidation_pattern(&self, entity: EntityType, id: Option<&str>) -> String {
        match id {
            Some(id) if !id.is_empty() => {
                format!("{}{}*", self.entity_prefix(entity), escape_glob(id))
            }
            _ => format!("{}*", self.entity_prefix(entity)),
        }
    }
}

/// Order-independent fingerprint of a filter object
pub fn fingerprint(filters: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(filters, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..FINGERPRINT_BYTES])
}

fn is_empty_filter(filters: &Value) -> bool {
    match filters {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Compact JSON with object keys sorted at every depth
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::from(k.as_str()));
                write_canonical(v, out);
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
        leaf => {
            let _ = write!(out, "{}", leaf);
        }
    }
}

/// Escape Redis glob metacharacters
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
