//! Result aggregation
//!
//! Merges check runs into one report grouped by category, check, and region,
//! with per-status counts at the report and check level.

use super::scheduler::{CheckRun, RunState};
use crate::cache::TracedLookup;
use crate::check::{CheckResult, Status};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// Region label for results not tied to a region
pub const GLOBAL_REGION: &str = "global";

/// Result counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub pass: usize,
    pub warning: usize,
    pub fail: usize,
    pub error: usize,
    pub total: usize,
}

impl Summary {
    fn count(&mut self, status: Status) {
        match status {
            Status::Pass => self.pass += 1,
            Status::Warning => self.warning += 1,
            Status::Fail => self.fail += 1,
            Status::Error => self.error += 1,
        }
        self.total += 1;
    }

    fn absorb(&mut self, other: &Summary) {
        self.pass += other.pass;
        self.warning += other.warning;
        self.fail += other.fail;
        self.error += other.error;
        self.total += other.total;
    }

    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Pass => self.pass,
            Status::Warning => self.warning,
            Status::Fail => self.fail,
            Status::Error => self.error,
        }
    }
}

/// Results of one check in one region
#[derive(Debug, Clone, Serialize)]
pub struct RegionResults {
    pub region: String,
    pub results: Vec<CheckResult>,
}

/// Everything one check produced
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub title: &'static str,
    pub description: &'static str,
    pub recommended_action: &'static str,
    pub link: &'static str,
    pub state: RunState,
    pub duration_ms: u64,
    pub summary: Summary,
    /// Regions in first-emitted order
    pub regions: Vec<RegionResults>,
    /// Cache keys consulted, including lookups that produced no result
    pub sources: Vec<TracedLookup>,
}

impl CheckReport {
    fn from_run(run: CheckRun) -> Self {
        let mut summary = Summary::default();
        let mut regions: Vec<RegionResults> = Vec::new();

        for result in run.output.results {
            summary.count(result.status);
            let region = result.region.clone().unwrap_or_else(|| GLOBAL_REGION.to_string());
            match regions.iter_mut().find(|g| g.region == region) {
                Some(group) => group.results.push(result),
                None => regions.push(RegionResults {
                    region,
                    results: vec![result],
                }),
            }
        }

        Self {
            title: run.metadata.title,
            description: run.metadata.description,
            recommended_action: run.metadata.recommended_action,
            link: run.metadata.link,
            state: run.state,
            duration_ms: run.duration.as_millis() as u64,
            summary,
            regions,
            sources: run.output.source.lookups(),
        }
    }

    /// All results of this check, in emission order
    pub fn results(&self) -> Vec<&CheckResult> {
        self.regions.iter().flat_map(|g| g.results.iter()).collect()
    }

    /// Results of one region
    pub fn region(&self, region: &str) -> Option<&[CheckResult]> {
        self.regions
            .iter()
            .find(|g| g.region == region)
            .map(|g| g.results.as_slice())
    }
}

/// Final scan report
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scan_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub version: &'static str,
    pub duration_ms: u64,
    pub govcloud: bool,
    pub summary: Summary,
    /// category -> check id -> report
    pub categories: BTreeMap<String, BTreeMap<String, CheckReport>>,
}

impl Report {
    /// Find a check's report by id
    pub fn check(&self, id: &str) -> Option<&CheckReport> {
        self.categories.values().find_map(|checks| checks.get(id))
    }

    /// Number of checks in the report
    pub fn check_count(&self) -> usize {
        self.categories.values().map(|c| c.len()).sum()
    }

    /// Whether any check reported a failure or an error
    pub fn has_findings(&self) -> bool {
        self.summary.fail > 0 || self.summary.error > 0
    }
}

/// Collects check runs for one scan (single writer)
pub struct Aggregator {
    started: Instant,
    govcloud: bool,
    summary: Summary,
    categories: BTreeMap<String, BTreeMap<String, CheckReport>>,
}

impl Aggregator {
    pub fn new(govcloud: bool) -> Self {
        Self {
            started: Instant::now(),
            govcloud,
            summary: Summary::default(),
            categories: BTreeMap::new(),
        }
    }

    /// Add a finished run
    pub fn record(&mut self, run: CheckRun) {
        let category = run.metadata.category.to_string();
        let id = run.metadata.id.to_string();
        let report = CheckReport::from_run(run);

        self.summary.absorb(&report.summary);
        self.categories.entry(category).or_default().insert(id, report);
    }

    pub fn finish(self) -> Report {
        Report {
            scan_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            version: crate::VERSION,
            duration_ms: self.started.elapsed().as_millis() as u64,
            govcloud: self.govcloud,
            summary: self.summary,
            categories: self.categories,
        }
    }
}
