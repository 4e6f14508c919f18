//! Source Tracer
//!
//! Records which cache entries a check consulted and what each lookup found,
//! so a report can show where every finding came from.

use super::{CacheEntry, CacheKey, ResourceCache};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a traced lookup found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LookupState {
    Missing,
    Errored { errors: Vec<String> },
    Ready { items: usize },
}

impl From<&CacheEntry> for LookupState {
    fn from(entry: &CacheEntry) -> Self {
        match entry {
            CacheEntry::Missing => Self::Missing,
            CacheEntry::Errored(errors) => Self::Errored {
                errors: errors.clone(),
            },
            CacheEntry::Ready(items) => Self::Ready { items: items.len() },
        }
    }
}

/// One consulted key, as written to the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TracedLookup {
    pub key: CacheKey,
    #[serde(flatten)]
    pub state: LookupState,
}

/// Audit trail of the cache keys a check consulted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTrace {
    lookups: BTreeMap<CacheKey, LookupState>,
}

impl SourceTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` in `cache`, recording the lookup
    pub fn add_source(&mut self, cache: &ResourceCache, key: CacheKey) -> Arc<CacheEntry> {
        let entry = cache.get(&key);
        tracing::debug!("Cache lookup {} -> {:?}", key, LookupState::from(entry.as_ref()));
        self.lookups.insert(key, LookupState::from(entry.as_ref()));
        entry
    }

    /// Fold another trace into this one
    pub fn merge(&mut self, other: SourceTrace) {
        self.lookups.extend(other.lookups);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lookups.contains_key(key)
    }

    pub fn state(&self, key: &CacheKey) -> Option<&LookupState> {
        self.lookups.get(key)
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Consulted keys in key order
    pub fn lookups(&self) -> Vec<TracedLookup> {
        self.lookups
            .iter()
            .map(|(key, state)| TracedLookup {
                key: key.clone(),
                state: state.clone(),
            })
            .collect()
    }
}

/// Free-function form of [`SourceTrace::add_source`]
pub fn add_source(cache: &ResourceCache, source: &mut SourceTrace, key: CacheKey) -> Arc<CacheEntry> {
    source.add_source(cache, key)
}
