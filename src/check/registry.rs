//! Check Registry
//!
//! The explicit table of checks a scan may run. The table is built once at
//! startup and passed to the scheduler; there is no global registry.

use super::compute::BootVolumeBackupEnabled;
use super::{Check, CheckMetadata};
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Registered checks, in registration order
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: Vec<Arc<dyn Check>>,
}

impl CheckRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every check shipped with postura
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(BootVolumeBackupEnabled::new()))?;
        Ok(registry)
    }

    /// Add a check; ids must be unique
    pub fn register(&mut self, check: Arc<dyn Check>) -> Result<()> {
        let id = check.metadata().id;
        if self.get(id).is_some() {
            bail!("Check '{}' is already registered", id);
        }
        self.checks.push(check);
        Ok(())
    }

    /// Get a check by id
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Check>> {
        self.checks.iter().find(|c| c.metadata().id == id)
    }

    /// Get all check ids
    pub fn ids(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.metadata().id).collect()
    }

    /// Metadata of every registered check
    pub fn metadata(&self) -> Vec<&CheckMetadata> {
        self.checks.iter().map(|c| c.metadata()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Check>> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Narrow the registry down to a selection
    ///
    /// `include` (when non-empty) keeps only the named checks, `categories`
    /// (when non-empty) keeps only checks in those categories (case-insensitive),
    /// and `exclude` always drops. Unknown ids in `include` are an error.
    pub fn select(&self, include: &[String], exclude: &[String], categories: &[String]) -> Result<Self> {
        for id in include {
            if self.get(id).is_none() {
                bail!("Unknown check: {}", id);
            }
        }

        let include: HashSet<&str> = include.iter().map(|s| s.as_str()).collect();
        let exclude: HashSet<&str> = exclude.iter().map(|s| s.as_str()).collect();

        let checks = self
            .checks
            .iter()
            .filter(|c| {
                let meta = c.metadata();
                (include.is_empty() || include.contains(meta.id))
                    && (categories.is_empty()
                        || categories.iter().any(|cat| cat.eq_ignore_ascii_case(meta.category)))
                    && !exclude.contains(meta.id)
            })
            .cloned()
            .collect();

        Ok(Self { checks })
    }
}
