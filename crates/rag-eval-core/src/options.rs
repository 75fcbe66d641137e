//! Free-form option groups passed through to model runtimes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model and config constructors may execute custom model code.
pub const TRUST_REMOTE_CODE: &str = "trust_remote_code";

/// Encoders must hand back tensors, not plain lists.
pub const CONVERT_TO_TENSOR: &str = "convert_to_tensor";

/// Named-prompt selector; prompts are always passed explicitly instead.
pub const PROMPT_NAME: &str = "prompt_name";

/// Batch size used when an encode option group carries one.
pub const BATCH_SIZE: &str = "batch_size";

/// An ordered string-keyed map of JSON values.
///
/// Merging never mutates either side: [`Options::merged`] returns a fresh map,
/// so per-call overrides stay local to the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, Value>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Non-negative integer option. Zero is treated as absent.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .filter(|n| *n > 0)
            .map(|n| n as usize)
    }

    /// A new map holding `self` overlaid with `overrides` (overrides win).
    pub fn merged(&self, overrides: &Options) -> Options {
        let mut merged = self.0.clone();
        merged.extend(overrides.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Options(merged)
    }

    /// A copy with `key` removed.
    pub fn without(&self, key: &str) -> Options {
        let mut copy = self.clone();
        copy.0.remove(key);
        copy
    }

    /// A copy with `key` forced to `true`.
    pub fn forcing(&self, key: &str) -> Options {
        let mut copy = self.clone();
        copy.0.insert(key.to_string(), Value::Bool(true));
        copy
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Options(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
