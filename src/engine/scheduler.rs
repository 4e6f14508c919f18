//! Check Scheduler
//!
//! Runs every check of a registry exactly once against a shared, read-only
//! cache.
//!
//! # Failure isolation
//!
//! - Check error: converted to an Error result attributed to the check
//! - Check panic: caught at the task boundary, converted to an Error result
//! - Check timeout: the check is abandoned and an Error result is synthesized
//! - Scan cancellation: no new checks start; unstarted checks are recorded as
//!   cancelled, running checks finish or hit their timeout
//!
//! No failure of a single check aborts the scan.

use super::aggregator::{Aggregator, Report};
use crate::check::{panic_message, CheckContext, CheckMetadata, CheckOutput, CheckRegistry, CheckResult, Status};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_parallel: usize,
    pub check_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            check_timeout: Duration::from_secs(60),
        }
    }
}

/// How a check invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Completed,
    Failed,
    TimedOut,
    Panicked,
    Cancelled,
}

/// Outcome of one check invocation
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub metadata: CheckMetadata,
    pub state: RunState,
    pub output: CheckOutput,
    pub duration: Duration,
}

impl CheckRun {
    /// A run that ended without output from the check itself
    fn synthesized(metadata: CheckMetadata, state: RunState, message: String, duration: Duration) -> Self {
        let mut output = CheckOutput::new();
        output.add_result(CheckResult::new(Status::Error, message));
        Self {
            metadata,
            state,
            output,
            duration,
        }
    }

    fn cancelled(metadata: CheckMetadata) -> Self {
        Self {
            metadata,
            state: RunState::Cancelled,
            output: CheckOutput::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Bounded-parallel check runner
pub struct Scheduler {
    config: SchedulerConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            shutdown: None,
        }
    }

    /// Stop scheduling new checks once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run every check in `registry` and build the report
    pub async fn scan(&self, registry: &CheckRegistry, ctx: &CheckContext) -> Report {
        let mut aggregator = Aggregator::new(ctx.settings.govcloud);
        self.run(registry, ctx, &mut aggregator).await;
        aggregator.finish()
    }

    /// Run every check in `registry`, recording each run in `aggregator`
    pub async fn run(&self, registry: &CheckRegistry, ctx: &CheckContext, aggregator: &mut Aggregator) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut shutdown = self.shutdown.clone();
        let mut tasks = Vec::with_capacity(registry.len());

        tracing::info!(
            "Running {} checks (max {} concurrent, timeout {:?})",
            registry.len(),
            self.config.max_parallel,
            self.config.check_timeout
        );

        for check in registry.iter() {
            let metadata = check.metadata().clone();

            let Some(permit) = acquire(&semaphore, shutdown.as_mut()).await else {
                tracing::warn!("Scan cancelled, not starting {}", metadata.id);
                aggregator.record(CheckRun::cancelled(metadata));
                continue;
            };

            let check = Arc::clone(check);
            let ctx = ctx.clone();
            let timeout = self.config.check_timeout;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                let outcome = tokio::time::timeout(timeout, check.run(&ctx)).await;
                (outcome, start.elapsed())
            });

            tasks.push((metadata, Instant::now(), handle));
        }

        for (metadata, spawned_at, handle) in tasks {
            let run = match handle.await {
                Ok((Ok(Ok(output)), duration)) => {
                    tracing::info!("{} completed with {} results", metadata.id, output.results.len());
                    CheckRun {
                        metadata,
                        state: RunState::Completed,
                        output,
                        duration,
                    }
                }
                Ok((Ok(Err(err)), duration)) => {
                    tracing::warn!("{} failed: {:#}", metadata.id, err);
                    let message = format!("Check failed: {:#}", err);
                    CheckRun::synthesized(metadata, RunState::Failed, message, duration)
                }
                Ok((Err(_), duration)) => {
                    tracing::warn!("{} timed out after {:?}", metadata.id, self.config.check_timeout);
                    let message = format!("Check timed out after {:?}", self.config.check_timeout);
                    CheckRun::synthesized(metadata, RunState::TimedOut, message, duration)
                }
                Err(join_err) => {
                    let detail = if join_err.is_panic() {
                        panic_message(join_err.into_panic().as_ref())
                    } else {
                        join_err.to_string()
                    };
                    tracing::warn!("{} crashed: {}", metadata.id, detail);
                    let message = format!("Check crashed: {}", detail);
                    CheckRun::synthesized(metadata, RunState::Panicked, message, spawned_at.elapsed())
                }
            };
            aggregator.record(run);
        }
    }
}

/// Wait for a permit; `None` once the scan has been cancelled
async fn acquire(
    semaphore: &Arc<Semaphore>,
    shutdown: Option<&mut watch::Receiver<bool>>,
) -> Option<OwnedSemaphorePermit> {
    let Some(shutdown) = shutdown else {
        return Arc::clone(semaphore).acquire_owned().await.ok();
    };

    if *shutdown.borrow() {
        return None;
    }

    let permit = tokio::select! {
        permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
        _ = cancelled(shutdown) => None,
    };

    if *shutdown.borrow() {
        return None;
    }
    permit
}

/// Resolves once the shutdown flag is set; never resolves if the sender is gone
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceCache;
    use crate::check::Check;
    use crate::config::ScanSettings;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Emit(usize),
        Fail,
        Panic,
        Sleep(Duration),
        Track(Arc<Gauge>),
    }

    /// Counts checks running at the same time
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    struct FakeCheck {
        metadata: CheckMetadata,
        behavior: Behavior,
    }

    fn fake(id: &'static str, behavior: Behavior) -> Arc<dyn Check> {
        Arc::new(FakeCheck {
            metadata: CheckMetadata {
                id,
                title: id,
                category: "Test",
                description: "",
                more_info: "",
                recommended_action: "",
                link: "",
                apis: &[],
            },
            behavior,
        })
    }

    impl Check for FakeCheck {
        fn metadata(&self) -> &CheckMetadata {
            &self.metadata
        }

        fn run<'a>(&'a self, _ctx: &'a CheckContext) -> BoxFuture<'a, anyhow::Result<CheckOutput>> {
            async move {
                match &self.behavior {
                    Behavior::Emit(n) => {
                        let mut output = CheckOutput::new();
                        for i in 0..*n {
                            output.add_result(
                                CheckResult::new(Status::Pass, format!("result {}", i)).in_region("r1"),
                            );
                        }
                        Ok(output)
                    }
                    Behavior::Fail => Err(anyhow::anyhow!("upstream exploded")),
                    Behavior::Panic => panic!("check bug"),
                    Behavior::Sleep(d) => {
                        tokio::time::sleep(*d).await;
                        Ok(CheckOutput::new())
                    }
                    Behavior::Track(gauge) => {
                        let now = gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        gauge.max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(CheckOutput::new())
                    }
                }
            }
            .boxed()
        }
    }

    fn registry(checks: Vec<Arc<dyn Check>>) -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        for check in checks {
            registry.register(check).unwrap();
        }
        registry
    }

    fn ctx() -> CheckContext {
        CheckContext::new(ResourceCache::new(), ScanSettings::default())
    }

    fn scheduler(max_parallel: usize, timeout_ms: u64) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            max_parallel,
            check_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn test_crash_does_not_abort_other_checks() {
        let registry = registry(vec![
            fake("first", Behavior::Emit(2)),
            fake("crasher", Behavior::Panic),
            fake("failer", Behavior::Fail),
            fake("last", Behavior::Emit(1)),
        ]);

        let report = scheduler(2, 5_000).scan(&registry, &ctx()).await;

        assert_eq!(report.check("first").unwrap().state, RunState::Completed);
        assert_eq!(report.check("first").unwrap().summary.pass, 2);
        assert_eq!(report.check("last").unwrap().summary.pass, 1);

        let crasher = report.check("crasher").unwrap();
        assert_eq!(crasher.state, RunState::Panicked);
        assert_eq!(crasher.results()[0].message, "Check crashed: check bug");
        assert_eq!(crasher.results()[0].status, Status::Error);

        let failer = report.check("failer").unwrap();
        assert_eq!(failer.state, RunState::Failed);
        assert_eq!(failer.results()[0].message, "Check failed: upstream exploded");
    }

    #[tokio::test]
    async fn test_parallel_checks_are_bounded() {
        const IDS: [&str; 6] = ["c1", "c2", "c3", "c4", "c5", "c6"];
        let gauge = Arc::new(Gauge::default());
        let registry = registry(
            IDS.iter()
                .map(|&id| fake(id, Behavior::Track(Arc::clone(&gauge))))
                .collect(),
        );

        let report = scheduler(2, 5_000).scan(&registry, &ctx()).await;

        assert_eq!(report.check_count(), 6);
        for id in IDS {
            assert_eq!(report.check(id).unwrap().state, RunState::Completed);
        }
        assert_eq!(gauge.max_seen.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_synthesizes_error() {
        let registry = registry(vec![
            fake("slow", Behavior::Sleep(Duration::from_secs(30))),
            fake("fast", Behavior::Emit(1)),
        ]);

        let report = scheduler(2, 50).scan(&registry, &ctx()).await;

        let slow = report.check("slow").unwrap();
        assert_eq!(slow.state, RunState::TimedOut);
        assert_eq!(slow.results().len(), 1);
        assert_eq!(slow.results()[0].message, "Check timed out after 50ms");
        assert_eq!(report.check("fast").unwrap().state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let registry = registry(vec![fake("a", Behavior::Emit(1)), fake("b", Behavior::Emit(1))]);
        let report = scheduler(2, 1_000).with_shutdown(rx).scan(&registry, &ctx()).await;

        assert_eq!(report.check("a").unwrap().state, RunState::Cancelled);
        assert_eq!(report.check("b").unwrap().state, RunState::Cancelled);
        assert_eq!(report.summary.total, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_scheduling_but_running_check_finishes() {
        let (tx, rx) = watch::channel(false);
        let registry = registry(vec![
            fake("running", Behavior::Sleep(Duration::from_millis(200))),
            fake("queued", Behavior::Emit(1)),
        ]);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let report = scheduler(1, 5_000).with_shutdown(rx).scan(&registry, &ctx()).await;

        assert_eq!(report.check("running").unwrap().state, RunState::Completed);
        assert_eq!(report.check("queued").unwrap().state, RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let registry = registry(vec![fake("a", Behavior::Emit(3))]);
        let report = scheduler(1, 1_000).with_shutdown(rx).scan(&registry, &ctx()).await;

        assert_eq!(report.check("a").unwrap().state, RunState::Completed);
        assert_eq!(report.summary.pass, 3);
    }

    #[tokio::test]
    async fn test_empty_registry_gives_empty_report() {
        let report = scheduler(4, 1_000).scan(&CheckRegistry::new(), &ctx()).await;
        assert_eq!(report.summary.total, 0);
        assert!(report.categories.is_empty());
    }
}
