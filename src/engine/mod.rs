//! Scan engine
//!
//! - [`scheduler`] - Runs every registered check once, in parallel, with
//!   timeouts, crash isolation, and cancellation
//! - [`aggregator`] - Merges check runs into the final [`Report`]

pub mod aggregator;
pub mod scheduler;

pub use aggregator::{Aggregator, CheckReport, Report, Summary};
pub use scheduler::{CheckRun, RunState, Scheduler, SchedulerConfig};
