//! Composite cache keys.
//!
//! A key is the normalized question text plus optional scope discriminators
//! (airline, union, contract, ...). Lookups compare fingerprints of the
//! normalized form, so trivially rephrased questions share one entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::{CrewError, Result};

/// Scope discriminators attached to a question, kept in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheContext(BTreeMap<String, String>);

impl CacheContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a discriminator. Keys and values are trimmed; empty values are dropped.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.0.insert(key.to_string(), value.to_string());
    }

    /// Build a context from a JSON object of scalars.
    ///
    /// Strings, numbers and booleans are accepted; `null` is skipped. Nested
    /// arrays or objects are rejected because they have no stable identity.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        use serde_json::Value;

        let mut ctx = Self::new();
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(s) => ctx.insert(key, s),
                Value::Number(n) => ctx.insert(key, &n.to_string()),
                Value::Bool(b) => ctx.insert(key, if *b { "true" } else { "false" }),
                Value::Array(_) | Value::Object(_) => {
                    return Err(CrewError::Validation(format!(
                        "context field '{key}' must be a string, number or boolean"
                    )));
                }
            }
        }
        Ok(ctx)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Fold query text the way a full-text index would before comparing it.
///
/// NFKC, lowercase, punctuation as a word separator, whitespace collapsed.
pub fn normalize_query(text: &str) -> String {
    let folded: String = text
        .nfkc()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity of a cache entry: normalized question plus scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    query: String,
    context: CacheContext,
}

impl CompositeKey {
    pub fn new(query: &str, context: CacheContext) -> Self {
        Self {
            query: normalize_query(query),
            context,
        }
    }

    /// Normalized question text.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn context(&self) -> &CacheContext {
        &self.context
    }

    /// Deterministic SHA-256 fingerprint of the normalized key.
    ///
    /// Every component is length-prefixed so `("a b", {})` and `("a", {"b": ..})`
    /// cannot collide through a separator.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, &self.query);
        hasher.update((self.context.len() as u64).to_le_bytes());
        for (k, v) in self.context.iter() {
            hash_field(&mut hasher, k);
            hash_field(&mut hasher, v);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fp = self.fingerprint();
        write!(f, "{}", &fp[..8])
    }
}

fn hash_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}
