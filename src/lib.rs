//! postura - cloud security-posture scanning core
//!
//! Runs a registry of compliance checks against a pre-collected API response
//! cache and aggregates their findings into a single report.
//!
//! # Module Structure
//!
//! - [`cache`] - Read-only API response cache and per-check source tracing
//! - [`check`] - Check plugin contract, result model, and the shipped checks
//! - [`region`] - Region sets and region subscription resolution
//! - [`engine`] - Check scheduler and result aggregator
//! - [`config`] - Persistent configuration and scan settings

pub mod cache;
pub mod check;
pub mod config;
pub mod engine;
pub mod region;

/// Version injected at compile time via POSTURA_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("POSTURA_VERSION") {
    Some(v) => v,
    None => "dev",
};
