//! Configuration Management
//!
//! Handles persistent configuration storage for postura and the settings
//! handed to every check.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_PARALLEL: usize = 8;
const DEFAULT_REGION_PARALLEL: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_region_parallel() -> usize {
    DEFAULT_REGION_PARALLEL
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scan a government cloud realm
    #[serde(default)]
    pub govcloud: bool,
    /// Tenancy home region (where region subscriptions are listed)
    #[serde(default)]
    pub home_region: Option<String>,
    /// Checks running at the same time
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Regions processed at the same time inside one check
    #[serde(default = "default_region_parallel")]
    pub region_parallel: usize,
    /// Per-check timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Checks never run
    #[serde(default)]
    pub skip_checks: Vec<String>,
    /// Last cache file scanned
    #[serde(default)]
    pub last_cache: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            govcloud: false,
            home_region: None,
            max_parallel: DEFAULT_MAX_PARALLEL,
            region_parallel: DEFAULT_REGION_PARALLEL,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            skip_checks: Vec::new(),
            last_cache: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("postura").join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Remember the cache file and save
    pub fn set_last_cache(&mut self, path: &Path) -> Result<()> {
        self.last_cache = Some(path.to_path_buf());
        self.save()
    }

    /// Per-check timeout
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Settings passed to checks
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            govcloud: self.govcloud,
            home_region: self.home_region.clone(),
            region_concurrency: self.region_parallel.max(1),
        }
    }
}

/// Settings visible to checks during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSettings {
    pub govcloud: bool,
    pub home_region: Option<String>,
    pub region_concurrency: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Config::default().scan_settings()
    }
}
