//! Resource Cache
//!
//! Read-only store of collected API responses, keyed by
//! `(service, operation, region)`. The cache is populated by an external
//! collection phase and loaded once per scan from a JSON or YAML file:
//!
//! ```text
//! { "<service>": { "<operation>": { "<region>": { "data": [...], "err": ... } } } }
//! ```
//!
//! Each raw entry is classified into a [`CacheEntry`] at load time, so checks
//! never look at `data`/`err` directly.

pub mod source;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use source::{add_source, LookupState, SourceTrace, TracedLookup};

/// Message used when an errored entry carries no usable error text
const UNEXPECTED_ERROR: &str = "Unexpected error";

/// Key of one collected API response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub service: String,
    pub operation: String,
    pub region: String,
}

impl CacheKey {
    pub fn new(service: &str, operation: &str, region: &str) -> Self {
        Self {
            service: service.to_string(),
            operation: operation.to_string(),
            region: region.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.operation, self.region)
    }
}

/// A cache lookup, classified
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// Nothing was collected for this key
    Missing,
    /// The upstream call failed or returned no data; the data is unusable
    Errored(Vec<String>),
    /// The upstream call succeeded
    Ready(Vec<Value>),
}

impl CacheEntry {
    /// Classify a raw `{data, err}` pair
    fn classify(raw: RawEntry) -> Self {
        let errors = raw.err.as_ref().map(error_messages).unwrap_or_default();
        if !errors.is_empty() {
            return Self::Errored(errors);
        }

        match raw.data {
            Some(Value::Array(items)) => Self::Ready(items),
            Some(Value::Null) | None => Self::Errored(Vec::new()),
            Some(other) => Self::Ready(vec![other]),
        }
    }
}

/// Raw entry as written by the collector
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    err: Option<Value>,
}

/// service -> operation -> region -> entry; a `null` entry was never collected
type RawCache = HashMap<String, HashMap<String, HashMap<String, Option<RawEntry>>>>;

/// Immutable store of collected API responses
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<CacheKey, Arc<CacheEntry>>,
}

impl ResourceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file; `.yaml`/`.yml` files are parsed as YAML, anything else as JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache file {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let raw: RawCache = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML cache {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON cache {}", path.display()))?
        };

        let cache = Self::from_raw(raw);
        tracing::info!("Loaded {} cache entries from {:?}", cache.len(), path);
        Ok(cache)
    }

    /// Build a cache from an already-parsed JSON document
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawCache =
            serde_json::from_value(value).context("Cache document has an unexpected shape")?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawCache) -> Self {
        let mut entries = HashMap::new();
        for (service, operations) in raw {
            for (operation, regions) in operations {
                for (region, entry) in regions {
                    let Some(entry) = entry else { continue };
                    let key = CacheKey::new(&service, &operation, &region);
                    entries.insert(key, Arc::new(CacheEntry::classify(entry)));
                }
            }
        }
        Self { entries }
    }

    /// Insert one entry (used while assembling a cache; the scan never mutates it)
    pub fn insert(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, Arc::new(entry));
    }

    /// Look up an entry; absent keys are reported as [`CacheEntry::Missing`]
    pub fn get(&self, key: &CacheKey) -> Arc<CacheEntry> {
        match self.entries.get(key) {
            Some(entry) => Arc::clone(entry),
            None => Arc::new(CacheEntry::Missing),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extract human-readable messages from a collector `err` value
fn error_messages(err: &Value) -> Vec<String> {
    match err {
        Value::Null | Value::Bool(false) => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(error_messages).collect(),
        Value::Object(map) => {
            let text = map
                .get("message")
                .and_then(|v| v.as_str())
                .or_else(|| map.get("code").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .unwrap_or_else(|| err.to_string());
            vec![text]
        }
        other => vec![other.to_string()],
    }
}

/// Human-readable summary of why an entry is unusable
pub fn format_error(entry: &CacheEntry) -> String {
    match entry {
        CacheEntry::Errored(errors) if !errors.is_empty() => errors.join("; "),
        _ => UNEXPECTED_ERROR.to_string(),
    }
}
