//! Check plugin contract
//!
//! A check is a self-contained, read-only unit: it exposes static metadata and
//! a `run` operation that inspects the [`ResourceCache`] and emits
//! [`CheckResult`]s plus the [`SourceTrace`] of what it consulted.
//!
//! # Module Structure
//!
//! - [`registry`] - Explicit table of the checks available to a scan
//! - [`compute`] - Compute service checks
//!
//! # Writing a check
//!
//! Most checks iterate regions with [`for_each_region`], which handles
//! subscription filtering, bounded concurrency, ordering, and crash isolation:
//!
//! ```ignore
//! fn run<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, Result<CheckOutput>> {
//!     async move {
//!         Ok(for_each_region(ctx, "bucket", |mut scope| async move {
//!             let buckets = scope.add_source("bucket", "list");
//!             // classify, then scope.add_result(..)
//!             scope
//!         })
//!         .await)
//!     }
//!     .boxed()
//! }
//! ```

pub mod compute;
pub mod registry;

use crate::cache::{CacheEntry, CacheKey, ResourceCache, SourceTrace};
use crate::config::ScanSettings;
use crate::region::RegionResolver;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

pub use registry::CheckRegistry;

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Warning,
    Fail,
    Error,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pass, Status::Warning, Status::Fail, Status::Error];

    /// Numeric level (0 = pass .. 3 = error)
    pub fn code(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Warning => 1,
            Self::Fail => 2,
            Self::Error => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Warning => "WARNING",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding emitted by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl CheckResult {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = status.as_str().to_string();
        }
        Self {
            status,
            message,
            region: None,
            resource_id: None,
        }
    }

    pub fn in_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn for_resource(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }
}

/// Static description of a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMetadata {
    /// Registry key
    pub id: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub more_info: &'static str,
    pub recommended_action: &'static str,
    pub link: &'static str,
    /// API calls consulted, as `service:operation`
    pub apis: &'static [&'static str],
}

/// Everything a check may read during a scan
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub cache: Arc<ResourceCache>,
    pub settings: Arc<ScanSettings>,
    pub regions: Arc<RegionResolver>,
}

impl CheckContext {
    pub fn new(cache: ResourceCache, settings: ScanSettings) -> Self {
        let regions = RegionResolver::new(&settings);
        Self {
            cache: Arc::new(cache),
            settings: Arc::new(settings),
            regions: Arc::new(regions),
        }
    }

    pub fn with_resolver(mut self, resolver: RegionResolver) -> Self {
        self.regions = Arc::new(resolver);
        self
    }
}

/// Results and audit trail of one check invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutput {
    pub results: Vec<CheckResult>,
    pub source: SourceTrace,
}

impl CheckOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    /// Append another output, keeping emission order
    pub fn extend(&mut self, other: CheckOutput) {
        self.results.extend(other.results);
        self.source.merge(other.source);
    }
}

/// A compliance check
pub trait Check: Send + Sync {
    fn metadata(&self) -> &CheckMetadata;

    /// Inspect the cache; must not block and must not mutate shared state
    fn run<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, Result<CheckOutput>>;
}

/// Work area for one region of one check
///
/// The source trace is shared with [`for_each_region`] so lookups made
/// before a crash still reach the report.
pub struct RegionScope {
    region: String,
    cache: Arc<ResourceCache>,
    results: Vec<CheckResult>,
    source: Arc<Mutex<SourceTrace>>,
}

impl RegionScope {
    fn new(cache: Arc<ResourceCache>, region: String, source: Arc<Mutex<SourceTrace>>) -> Self {
        Self {
            region,
            cache,
            results: Vec::new(),
            source,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Look up `service:operation` in this region, recording the lookup
    pub fn add_source(&mut self, service: &str, operation: &str) -> Arc<CacheEntry> {
        let key = CacheKey::new(service, operation, &self.region);
        lock_trace(&self.source).add_source(&self.cache, key)
    }

    /// Emit a region-level result
    pub fn add_result(&mut self, status: Status, message: impl Into<String>) {
        let result = CheckResult::new(status, message).in_region(&self.region);
        self.results.push(result);
    }

    /// Emit a result about a single resource in this region
    pub fn add_resource_result(&mut self, status: Status, message: impl Into<String>, resource_id: &str) {
        let result = CheckResult::new(status, message)
            .in_region(&self.region)
            .for_resource(resource_id);
        self.results.push(result);
    }

    fn into_output(self) -> CheckOutput {
        CheckOutput {
            results: self.results,
            source: take_trace(&self.source),
        }
    }
}

/// A poisoned trace is still a valid record of completed lookups
fn lock_trace(source: &Mutex<SourceTrace>) -> MutexGuard<'_, SourceTrace> {
    source.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_trace(source: &Mutex<SourceTrace>) -> SourceTrace {
    std::mem::take(&mut *lock_trace(source))
}

/// Run `work` once per subscribed region of `service`
///
/// Regions come from the resolver in scan order and are processed up to
/// `settings.region_concurrency` at a time; outputs are merged in region order
/// regardless of completion order. A panic in one region becomes an
/// [`Status::Error`] result for that region only; lookups it already made are
/// kept in the trace.
pub async fn for_each_region<F, Fut>(ctx: &CheckContext, service: &str, work: F) -> CheckOutput
where
    F: Fn(RegionScope) -> Fut,
    Fut: Future<Output = RegionScope>,
{
    let work = &work;
    let limit = ctx.settings.region_concurrency.max(1);
    let regions = ctx.regions.regions_for(service).to_vec();

    let outputs: Vec<CheckOutput> = stream::iter(regions)
        .map(|region| async move {
            let source = Arc::new(Mutex::new(SourceTrace::new()));
            let subscribed = ctx.regions.check_region_subscription(
                &ctx.cache,
                &mut lock_trace(&source),
                &region,
            );
            if !subscribed {
                return CheckOutput {
                    results: Vec::new(),
                    source: take_trace(&source),
                };
            }

            let scope = RegionScope::new(Arc::clone(&ctx.cache), region.clone(), Arc::clone(&source));
            match AssertUnwindSafe(work(scope)).catch_unwind().await {
                Ok(scope) => scope.into_output(),
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    tracing::warn!("Check crashed in region {}: {}", region, detail);
                    let mut output = CheckOutput {
                        results: Vec::new(),
                        source: take_trace(&source),
                    };
                    output.add_result(
                        CheckResult::new(Status::Error, format!("Check crashed in region: {}", detail))
                            .in_region(&region),
                    );
                    output
                }
            }
        })
        .buffered(limit)
        .collect()
        .await;

    let mut merged = CheckOutput::new();
    for output in outputs {
        merged.extend(output);
    }
    merged
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context(regions: &[&str], concurrency: usize) -> CheckContext {
        let settings = ScanSettings {
            region_concurrency: concurrency,
            ..ScanSettings::default()
        };
        let resolver = RegionResolver::with_regions(
            RegionSet::new(regions.iter().map(|r| r.to_string()).collect()),
            None,
        );
        CheckContext::new(ResourceCache::new(), settings).with_resolver(resolver)
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Pass.code(), 0);
        assert_eq!(Status::Error.code(), 3);
        assert_eq!(Status::from_code(2), Some(Status::Fail));
        assert_eq!(Status::from_code(4), None);
        assert!(Status::Fail > Status::Warning);
    }

    #[test]
    fn test_empty_message_is_replaced() {
        let result = CheckResult::new(Status::Warning, "  ");
        assert_eq!(result.message, "WARNING");
    }

    #[test]
    fn test_result_serialization_skips_absent_fields() {
        let value = serde_json::to_value(CheckResult::new(Status::Fail, "bad")).unwrap();
        assert_eq!(value["status"], "FAIL");
        assert!(value.get("region").is_none());
    }

    #[tokio::test]
    async fn test_region_outputs_keep_region_order() {
        let ctx = context(&["r1", "r2", "r3"], 3);

        let output = for_each_region(&ctx, "bootVolume", |mut scope| async move {
            // Later regions finish first
            let delay = match scope.region() {
                "r1" => 30,
                "r2" => 15,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            scope.add_result(Status::Pass, "ok");
            scope
        })
        .await;

        let regions: Vec<_> = output.results.iter().map(|r| r.region.clone().unwrap()).collect();
        assert_eq!(regions, vec!["r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn test_region_panic_is_isolated() {
        let ctx = context(&["r1", "r2"], 2);

        let output = for_each_region(&ctx, "bootVolume", |mut scope| async move {
            if scope.region() == "r1" {
                panic!("boom");
            }
            scope.add_result(Status::Pass, "ok");
            scope
        })
        .await;

        assert_eq!(output.results.len(), 2);
        assert_eq!(output.results[0].status, Status::Error);
        assert_eq!(output.results[0].message, "Check crashed in region: boom");
        assert_eq!(output.results[1].status, Status::Pass);
    }

    #[tokio::test]
    async fn test_region_panic_keeps_consulted_sources() {
        let ctx = context(&["r1"], 1);

        let output = for_each_region(&ctx, "bootVolume", |mut scope| async move {
            scope.add_source("bootVolume", "list");
            if scope.region() == "r1" {
                panic!("boom");
            }
            scope
        })
        .await;

        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].status, Status::Error);
        assert!(output
            .source
            .contains(&CacheKey::new("regionSubscription", "list", "r1")));
        assert!(output.source.contains(&CacheKey::new("bootVolume", "list", "r1")));
    }

    #[tokio::test]
    async fn test_region_concurrency_is_bounded() {
        let ctx = context(&["r1", "r2", "r3", "r4", "r5", "r6"], 2);
        let in_flight = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        let output = for_each_region(&ctx, "bootVolume", |mut scope| {
            let (in_flight, max_seen) = (&in_flight, &max_seen);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                scope.add_result(Status::Pass, "ok");
                scope
            }
        })
        .await;

        assert_eq!(output.results.len(), 6);
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resource_results_carry_region_and_id() {
        let ctx = context(&["r1"], 1);
        let output = for_each_region(&ctx, "instance", |mut scope| async move {
            scope.add_resource_result(Status::Warning, "legacy shape", "ocid1.instance.a");
            scope
        })
        .await;

        let result = &output.results[0];
        assert_eq!(result.region.as_deref(), Some("r1"));
        assert_eq!(result.resource_id.as_deref(), Some("ocid1.instance.a"));
    }

    #[tokio::test]
    async fn test_subscription_lookup_is_traced() {
        let ctx = context(&["r1"], 1);
        let output = for_each_region(&ctx, "bootVolume", |scope| async move { scope }).await;
        assert!(output.results.is_empty());
        assert!(output
            .source
            .contains(&CacheKey::new("regionSubscription", "list", "r1")));
    }
}
