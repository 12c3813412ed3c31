//! Execution options and injected collaborators
//!
//! The engine never prints or reads signals itself. Callers pass a
//! [`Reporter`] for progress and a [`CancelToken`] for operator aborts.

use crate::error::StepError;
use crate::graph::Plan;
use crate::record::{RunReport, StepReport};
use crate::retry::RetryConfig;
use crate::step::Step;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default per-step time bound
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Options for a run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Evaluate checks and show what would run, without running commands or persisting
    pub dry_run: bool,
    /// Skip steps recorded as succeeded/skipped by an earlier run
    pub resume: bool,
    /// Steps to re-run regardless of records and idempotency checks
    pub force: HashSet<String>,
    /// Keep running independent steps after a failure
    pub keep_going: bool,
    /// Maximum concurrent parallel-safe steps
    pub jobs: usize,
    /// Time bound for steps without their own `timeout_secs`
    pub default_timeout: Duration,
    /// Backoff policy for retryable steps
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            resume: false,
            force: HashSet::new(),
            keep_going: false,
            jobs: 1,
            default_timeout: DEFAULT_STEP_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

/// Which stream an output line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Observer for run progress
///
/// Implementations must be thread-safe: parallel-safe steps report from
/// worker threads. Reporters have no influence on control flow.
pub trait Reporter: Send + Sync {
    /// Called once before the first step
    fn on_plan(&self, _plan: &Plan, _opts: &ExecuteOptions) {}

    /// Called when a step begins (`position` is 1-indexed)
    fn on_step_start(&self, position: usize, total: usize, step: &Step);

    /// Called for each line a step's command prints, as it arrives
    fn on_output(&self, step_id: &str, stream: OutputStream, line: &str);

    /// Called when a retryable step failed and will be attempted again
    fn on_retry(
        &self,
        _step_id: &str,
        _attempt: u32,
        _max_attempts: u32,
        _error: &StepError,
        _delay: Duration,
    ) {
    }

    /// Called when a step reaches its final status for this run
    fn on_step_complete(&self, step: &Step, report: &StepReport);

    /// Called once with the final report
    fn on_run_complete(&self, report: &RunReport);
}

/// No-op reporter
pub struct NoReporter;

impl Reporter for NoReporter {
    fn on_step_start(&self, _position: usize, _total: usize, _step: &Step) {}
    fn on_output(&self, _step_id: &str, _stream: OutputStream, _line: &str) {}
    fn on_step_complete(&self, _step: &Step, _report: &StepReport) {}
    fn on_run_complete(&self, _report: &RunReport) {}
}

/// Shared abort flag checked before each step, wave and retry
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the in-flight step finishes first
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
