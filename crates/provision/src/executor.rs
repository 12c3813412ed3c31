//! Execution engine - runs a plan step by step with resume, retry and halting

use crate::command::{self, CheckOutcome, Invocation, MAX_CAPTURED_OUTPUT, OutputBuffer};
use crate::context::{CancelToken, ExecuteOptions, OutputStream, Reporter};
use crate::error::{StateError, StepError};
use crate::graph::Plan;
use crate::record::{ExecutionRecord, RunOutcome, RunReport, StepReport, StepStatus};
use crate::retry::{RetryCallback, RetryConfig, with_retry};
use crate::state::{Records, StateStore};
use crate::step::Step;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Reason recorded for steps a resumed run does not re-run
pub const RESUMED_REASON: &str = "completed in a previous run";

/// What is known about each step while a run is in progress
///
/// Only mutated between waves, so workers of a parallel wave share it read-only.
pub struct RunState<'p> {
    plan: &'p Plan,
    prior: Records,
    reports: HashMap<String, StepReport>,
    /// Dry run: steps that would have run, treated as satisfied prerequisites
    would_run: HashSet<String>,
}

impl<'p> RunState<'p> {
    pub fn new(plan: &'p Plan, prior: Records) -> Self {
        Self {
            plan,
            prior,
            reports: HashMap::new(),
            would_run: HashSet::new(),
        }
    }

    /// Record carried over from an earlier run
    pub fn prior(&self, id: &str) -> Option<&ExecutionRecord> {
        self.prior.get(id)
    }

    /// Status in this run (`Pending` until the step finishes)
    pub fn status(&self, id: &str) -> StepStatus {
        self.reports
            .get(id)
            .map_or(StepStatus::Pending, |r| r.status)
    }

    /// First prerequisite that did not complete, if any
    pub fn blocking_prerequisite<'s>(&self, step: &'s Step) -> Option<&'s str> {
        step.prerequisites
            .iter()
            .find(|p| !self.status(p).is_complete() && !self.would_run.contains(p.as_str()))
            .map(String::as_str)
    }

    fn finish(&mut self, run: StepRun) {
        if run.would_run {
            self.would_run.insert(run.report.id.clone());
        }
        self.reports.insert(run.report.id.clone(), run.report);
    }

    fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.reports
            .values()
            .filter(|r| r.status == StepStatus::Failed)
    }

    fn into_report(mut self, outcome: RunOutcome, elapsed: Duration, dry_run: bool) -> RunReport {
        let steps = self
            .plan
            .steps()
            .iter()
            .map(|step| {
                self.reports
                    .remove(&step.id)
                    .unwrap_or_else(|| pending_report(step, None))
            })
            .collect();

        RunReport {
            identity: self.plan.identity().to_string(),
            catalog: self.plan.label().to_string(),
            dry_run,
            outcome,
            elapsed,
            steps,
        }
    }
}

/// Execute a plan
///
/// # Arguments
/// * `plan` - Steps in execution order
/// * `opts` - Resume, force, dry-run, parallelism, timeout and retry settings
/// * `store` - Where records are read from and persisted to
/// * `reporter` - Progress observer
/// * `cancel` - Checked before each step; the in-flight step always finishes
///
/// # Returns
/// A report with one entry per plan step. Failing to persist a record is
/// the only error, since a later resume could not trust the state.
pub fn execute(
    plan: &Plan,
    opts: &ExecuteOptions,
    store: &mut dyn StateStore,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
) -> Result<RunReport, StateError> {
    let started = Instant::now();

    let prior = if opts.resume {
        store.load_or_empty()
    } else if opts.dry_run {
        Records::new()
    } else {
        if plan.is_selection() {
            let ids: Vec<&str> = plan.ids().collect();
            store.forget(&ids)?;
        } else {
            store.clear()?;
        }
        Records::new()
    };
    log::debug!(
        "Executing {} steps of '{}' ({} prior records)",
        plan.len(),
        plan.label(),
        prior.len()
    );

    reporter.on_plan(plan, opts);

    let engine = Engine {
        plan,
        opts,
        reporter,
        cancel,
    };
    let mut state = RunState::new(plan, prior);

    for wave in plan.waves(opts.jobs) {
        if cancel.is_cancelled() {
            break;
        }

        let mut runnable = Vec::with_capacity(wave.len());
        for pos in wave {
            let step = &plan.steps()[pos];
            match state.blocking_prerequisite(step) {
                Some(blocker) => {
                    log::info!("Not attempting '{}': '{}' did not complete", step.id, blocker);
                    let note = format!("prerequisite '{blocker}' did not complete");
                    state.finish(StepRun {
                        report: pending_report(step, Some(note)),
                        would_run: false,
                    });
                }
                None => runnable.push(pos),
            }
        }

        let finished = if runnable.len() > 1 {
            engine.run_parallel(&runnable, &state, store)?
        } else {
            engine.run_sequential(&runnable, &state, store)?
        };

        let mut halted = false;
        for run in finished {
            if run.report.status == StepStatus::Failed && !opts.keep_going {
                halted = true;
            }
            state.finish(run);
        }

        if halted {
            log::info!("Halting after failure");
            break;
        }
    }

    let cancelled = cancel.is_cancelled() && state.reports.len() < plan.len();
    if cancelled {
        log::info!("Run cancelled, remaining steps left pending");
    }

    let outcome = if cancelled {
        RunOutcome::Cancelled
    } else if state.failures().next().is_none() {
        RunOutcome::Completed
    } else if state
        .failures()
        .all(|r| r.error().is_some_and(StepError::is_timeout))
    {
        RunOutcome::TimedOut
    } else {
        RunOutcome::Failed
    };

    let report = state.into_report(outcome, started.elapsed(), opts.dry_run);
    reporter.on_run_complete(&report);
    Ok(report)
}

fn pending_report(step: &Step, note: Option<String>) -> StepReport {
    StepReport {
        id: step.id.clone(),
        description: step.description.clone(),
        category: step.category,
        status: StepStatus::Pending,
        record: None,
        note,
    }
}

/// Result of running one step
struct StepRun {
    report: StepReport,
    would_run: bool,
}

impl StepRun {
    /// Record to persist: dry runs and resume short-circuits write nothing
    fn record_to_save(&self, dry_run: bool) -> Option<&ExecutionRecord> {
        if dry_run {
            return None;
        }
        self.report
            .record
            .as_ref()
            .filter(|r| r.reason.as_deref() != Some(RESUMED_REASON))
    }
}

struct Engine<'a> {
    plan: &'a Plan,
    opts: &'a ExecuteOptions,
    reporter: &'a dyn Reporter,
    cancel: &'a CancelToken,
}

impl Engine<'_> {
    fn run_sequential(
        &self,
        positions: &[usize],
        state: &RunState<'_>,
        store: &mut dyn StateStore,
    ) -> Result<Vec<StepRun>, StateError> {
        let mut finished = Vec::with_capacity(positions.len());
        for &pos in positions {
            if self.cancel.is_cancelled() {
                break;
            }
            let run = self.run_step(pos, state);
            if let Some(record) = run.record_to_save(self.opts.dry_run) {
                store.save(&run.report.id, record)?;
            }
            finished.push(run);
        }
        Ok(finished)
    }

    /// Run independent parallel-safe steps on a thread pool, persisting each as it finishes
    fn run_parallel(
        &self,
        positions: &[usize],
        state: &RunState<'_>,
        store: &mut dyn StateStore,
    ) -> Result<Vec<StepRun>, StateError> {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.jobs.min(positions.len()))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("Failed to create step thread pool, running sequentially: {e}");
                return self.run_sequential(positions, state, store);
            }
        };
        log::debug!("Running {} steps in parallel", positions.len());

        let store = Mutex::new(store);
        let save_error: Mutex<Option<StateError>> = Mutex::new(None);

        let results: Vec<Option<StepRun>> = pool.install(|| {
            positions
                .par_iter()
                .map(|&pos| {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    let run = self.run_step(pos, state);
                    if let Some(record) = run.record_to_save(self.opts.dry_run) {
                        let mut guard = match store.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        if let Err(e) = guard.save(&run.report.id, record) {
                            let mut slot = match save_error.lock() {
                                Ok(slot) => slot,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            slot.get_or_insert(e);
                        }
                    }
                    Some(run)
                })
                .collect()
        });

        let save_error = match save_error.into_inner() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(e) = save_error {
            return Err(e);
        }
        Ok(results.into_iter().flatten().collect())
    }

    /// Resume short-circuit, idempotency check, then the command with retries
    fn run_step(&self, pos: usize, state: &RunState<'_>) -> StepRun {
        let step = &self.plan.steps()[pos];
        let opts = self.opts;
        self.reporter.on_step_start(pos + 1, self.plan.len(), step);

        let forced = opts.force.contains(&step.id);
        let timeout = step.timeout(opts.default_timeout);

        if !forced
            && opts.resume
            && state.prior(&step.id).is_some_and(|r| r.status.is_complete())
        {
            log::debug!("Step '{}' {}", step.id, RESUMED_REASON);
            return self.complete(step, ExecutionRecord::begin().skip(RESUMED_REASON));
        }

        let record = ExecutionRecord::begin();

        if !forced
            && let Some(check) = &step.idempotency_check
            && command::probe(check, step, self.plan.env(), timeout) == CheckOutcome::Satisfied
        {
            log::debug!("Step '{}' already satisfied", step.id);
            let reason = format!("already satisfied ({})", check.describe());
            return self.complete(step, record.skip(reason));
        }

        if opts.dry_run {
            let note = if forced { "would run (forced)" } else { "would run" };
            let report = pending_report(step, Some(note.to_string()));
            self.reporter.on_step_complete(step, &report);
            return StepRun {
                report,
                would_run: true,
            };
        }

        let retry = if step.retryable {
            opts.retry.clone()
        } else {
            RetryConfig::no_retry()
        };
        let invocation = Invocation::for_step(step, self.plan.env(), &step.command, timeout);
        let mut output = OutputBuffer::new(MAX_CAPTURED_OUTPUT);
        let mut attempts = 0;
        let notifier = RetryNotifier {
            reporter: self.reporter,
            step_id: &step.id,
        };

        log::info!("Running step '{}'", step.id);
        let result = with_retry(&retry, Some(&notifier), Some(self.cancel), |attempt| {
            attempts = attempt;
            if attempt > 1 {
                output.push_line(&format!("--- attempt {attempt} ---"));
            }
            command::run(&invocation, &mut |stream: OutputStream, line: &str| {
                self.reporter.on_output(&step.id, stream, line);
                output.push_line(line);
            })
        });

        let mut record = match result {
            Ok(()) => record.succeed(output.into_string()),
            Err(error) => {
                log::warn!("Step '{}' failed: {}", step.id, error);
                record.fail(output.into_string(), error)
            }
        };
        record.attempts = attempts;
        self.complete(step, record)
    }

    fn complete(&self, step: &Step, record: ExecutionRecord) -> StepRun {
        let report = StepReport {
            id: step.id.clone(),
            description: step.description.clone(),
            category: step.category,
            status: record.status,
            record: Some(record),
            note: None,
        };
        self.reporter.on_step_complete(step, &report);
        StepRun {
            report,
            would_run: false,
        }
    }
}

/// Forwards retry notifications to the reporter
struct RetryNotifier<'a> {
    reporter: &'a dyn Reporter,
    step_id: &'a str,
}

impl RetryCallback for RetryNotifier<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &StepError, delay: Duration) {
        log::info!(
            "Step '{}' attempt {}/{} failed ({}), retrying in {:.1}s",
            self.step_id,
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
        self.reporter
            .on_retry(self.step_id, attempt, max_attempts, error, delay);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::context::NoReporter;
    use crate::graph::build_plan;
    use crate::state::{FileStateStore, MemoryStateStore};
    use crate::step::{Category, IdempotencyCheck};
    use std::fs;
    use std::path::Path;

    fn plan_of(steps: Vec<Step>) -> Plan {
        build_plan(&Catalog::from_steps(steps).unwrap()).unwrap()
    }

    fn run(plan: &Plan, opts: &ExecuteOptions, store: &mut dyn StateStore) -> RunReport {
        execute(plan, opts, store, &NoReporter, &CancelToken::new()).unwrap()
    }

    /// Command that appends the step id to a log file
    fn logging(id: &str, log: &Path) -> Step {
        Step::new(id, Category::Build, format!("echo {id} >> '{}'", log.display()))
    }

    fn invocations(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), 1.0)
    }

    #[test]
    fn test_runs_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            logging("c", &log).after(["b"]),
            logging("a", &log),
            logging("b", &log).after(["a"]),
        ]);

        let report = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(invocations(&log), ["a", "b", "c"]);
        assert_eq!(report.summary().succeeded, 3);
    }

    #[test]
    fn test_failure_halts_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            logging("a", &log),
            Step::new("b", Category::Build, "exit 1").after(["a"]),
            logging("c", &log).after(["b"]),
        ]);

        let report = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.outcome.exit_code(), 1);
        assert_eq!(report.status_of("a"), Some(StepStatus::Succeeded));
        assert_eq!(report.status_of("b"), Some(StepStatus::Failed));
        assert_eq!(report.status_of("c"), Some(StepStatus::Pending));
        assert_eq!(invocations(&log), ["a"]);
    }

    #[test]
    fn test_keep_going_runs_independent_steps() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            Step::new("a", Category::Build, "exit 1"),
            logging("b", &log).after(["a"]),
            logging("c", &log),
        ]);
        let opts = ExecuteOptions {
            keep_going: true,
            ..Default::default()
        };

        let report = run(&plan, &opts, &mut MemoryStateStore::new());
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.status_of("b"), Some(StepStatus::Pending));
        assert_eq!(report.status_of("c"), Some(StepStatus::Succeeded));
        assert!(report.get("b").unwrap().note.as_deref().unwrap().contains("'a'"));
        assert_eq!(invocations(&log), ["c"]);
    }

    #[test]
    fn test_satisfied_check_skips_command() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            logging("a", &log).with_check(IdempotencyCheck::Command("true".into())),
        ]);

        let mut store = MemoryStateStore::new();
        let report = run(&plan, &ExecuteOptions::default(), &mut store);
        assert_eq!(report.status_of("a"), Some(StepStatus::Skipped));
        assert!(invocations(&log).is_empty());
        assert_eq!(store.records()["a"].status, StepStatus::Skipped);
    }

    #[test]
    fn test_second_run_is_all_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let marker = dir.path().join("marker");
        let plan = plan_of(vec![
            Step::new("a", Category::Download, format!("touch '{}'", marker.display()))
                .with_check(IdempotencyCheck::Path {
                    path: marker.display().to_string(),
                }),
            logging("b", &log)
                .after(["a"])
                .with_check(IdempotencyCheck::Command(format!(
                    "test -s '{}'",
                    log.display()
                ))),
        ]);

        let first = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        assert_eq!(first.summary().succeeded, 2);

        let second = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_eq!(second.summary().skipped, 2);
        assert_eq!(invocations(&log), ["b"]);
    }

    #[test]
    fn test_force_bypasses_check() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            logging("a", &log).with_check(IdempotencyCheck::Command("true".into())),
        ]);
        let opts = ExecuteOptions {
            force: HashSet::from(["a".to_string()]),
            ..Default::default()
        };

        let report = run(&plan, &opts, &mut MemoryStateStore::new());
        assert_eq!(report.status_of("a"), Some(StepStatus::Succeeded));
        assert_eq!(invocations(&log), ["a"]);
    }

    struct CancelAfterFirst(CancelToken);

    impl Reporter for CancelAfterFirst {
        fn on_step_start(&self, _: usize, _: usize, _: &Step) {}
        fn on_output(&self, _: &str, _: OutputStream, _: &str) {}
        fn on_step_complete(&self, _: &Step, _: &StepReport) {
            self.0.cancel();
        }
        fn on_run_complete(&self, _: &RunReport) {}
    }

    #[test]
    fn test_resume_after_cancel_does_not_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![logging("a", &log), logging("b", &log).after(["a"])]);

        let cancel = CancelToken::new();
        let mut store = FileStateStore::new(dir.path(), plan.identity(), plan.label());
        let first = execute(
            &plan,
            &ExecuteOptions::default(),
            &mut store,
            &CancelAfterFirst(cancel.clone()),
            &cancel,
        )
        .unwrap();
        assert_eq!(first.outcome, RunOutcome::Cancelled);
        assert_eq!(first.outcome.exit_code(), 130);
        assert_eq!(first.status_of("b"), Some(StepStatus::Pending));

        let opts = ExecuteOptions {
            resume: true,
            ..Default::default()
        };
        let mut store = FileStateStore::new(dir.path(), plan.identity(), plan.label());
        let second = run(&plan, &opts, &mut store);
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_eq!(second.status_of("a"), Some(StepStatus::Skipped));
        let record = second.get("a").unwrap().record.as_ref().unwrap();
        assert_eq!(record.reason.as_deref(), Some(RESUMED_REASON));
        assert_eq!(invocations(&log), ["a", "b"]);
    }

    #[test]
    fn test_fresh_run_clears_prior_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![logging("a", &log)]);

        let mut prior = Records::new();
        prior.insert("a".into(), ExecutionRecord::begin().succeed(String::new()));
        let mut store = MemoryStateStore::with_records(prior);

        run(&plan, &ExecuteOptions::default(), &mut store);
        assert_eq!(invocations(&log), ["a"]);
    }

    #[test]
    fn test_fresh_selection_keeps_unselected_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let full = plan_of(vec![
            logging("a", &log),
            logging("b", &log).after(["a"]),
            logging("other", &log),
        ]);
        let narrowed = full.select(&["b".to_string()]).unwrap();

        let mut prior = Records::new();
        for id in ["a", "b", "other"] {
            prior.insert(id.into(), ExecutionRecord::begin().succeed(String::new()));
        }
        let mut store = MemoryStateStore::with_records(prior);

        let report = run(&narrowed, &ExecuteOptions::default(), &mut store);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(invocations(&log), ["a", "b"]);
        assert!(store.records().contains_key("other"));

        let opts = ExecuteOptions {
            resume: true,
            ..Default::default()
        };
        let resumed = run(&full, &opts, &mut store);
        assert_eq!(resumed.status_of("other"), Some(StepStatus::Skipped));
        assert_eq!(invocations(&log), ["a", "b"]);
    }

    #[test]
    fn test_resume_reruns_failed_step() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![logging("a", &log)]);

        let mut prior = Records::new();
        prior.insert(
            "a".into(),
            ExecutionRecord::begin().fail(String::new(), StepError::Execution { code: Some(1) }),
        );
        let opts = ExecuteOptions {
            resume: true,
            ..Default::default()
        };

        let report = run(&plan, &opts, &mut MemoryStateStore::with_records(prior));
        assert_eq!(report.status_of("a"), Some(StepStatus::Succeeded));
        assert_eq!(invocations(&log), ["a"]);
    }

    #[test]
    fn test_dry_run_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            logging("a", &log),
            logging("b", &log)
                .after(["a"])
                .with_check(IdempotencyCheck::Command("true".into())),
            logging("c", &log).after(["b"]),
        ]);
        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };

        let mut store = MemoryStateStore::new();
        let report = run(&plan, &opts, &mut store);
        assert!(report.dry_run);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.get("a").unwrap().note.as_deref(), Some("would run"));
        assert_eq!(report.status_of("b"), Some(StepStatus::Skipped));
        assert_eq!(report.get("c").unwrap().note.as_deref(), Some("would run"));
        assert_eq!(store.saves(), 0);
        assert!(invocations(&log).is_empty());
    }

    #[test]
    fn test_timeout_outcome() {
        let plan = plan_of(vec![
            Step::new("slow", Category::Service, "sleep 5").with_timeout(1),
        ]);

        let report = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        assert_eq!(report.outcome, RunOutcome::TimedOut);
        assert_eq!(report.outcome.exit_code(), 3);
        assert!(report.get("slow").unwrap().error().unwrap().is_timeout());
    }

    #[test]
    fn test_retryable_timeout_is_retried() {
        let plan = plan_of(vec![
            Step::new("slow", Category::Download, "sleep 5")
                .with_timeout(1)
                .retryable(),
        ]);
        let opts = ExecuteOptions {
            retry: fast_retry(),
            ..Default::default()
        };

        let report = run(&plan, &opts, &mut MemoryStateStore::new());
        assert_eq!(report.outcome, RunOutcome::TimedOut);
        let record = report.get("slow").unwrap().record.as_ref().unwrap();
        assert_eq!(record.attempts, 3);
        assert!(record.error.as_ref().is_some_and(StepError::is_timeout));
    }

    #[test]
    fn test_retryable_step_retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        // Fails until the counter file has two lines
        let script = format!(
            "echo x >> '{0}'; [ $(wc -l < '{0}') -ge 2 ]",
            counter.display()
        );
        let plan = plan_of(vec![
            Step::new("flaky", Category::Download, script).retryable(),
        ]);
        let opts = ExecuteOptions {
            retry: fast_retry(),
            ..Default::default()
        };

        let report = run(&plan, &opts, &mut MemoryStateStore::new());
        assert_eq!(report.status_of("flaky"), Some(StepStatus::Succeeded));
        let record = report.get("flaky").unwrap().record.as_ref().unwrap();
        assert_eq!(record.attempts, 2);
    }

    #[test]
    fn test_non_retryable_step_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let script = format!("echo a >> '{}'; exit 1", log.display());
        let plan = plan_of(vec![Step::new("a", Category::Patch, script)]);
        let opts = ExecuteOptions {
            retry: fast_retry(),
            ..Default::default()
        };

        let report = run(&plan, &opts, &mut MemoryStateStore::new());
        assert_eq!(report.status_of("a"), Some(StepStatus::Failed));
        assert_eq!(invocations(&log).len(), 1);
    }

    #[test]
    fn test_parallel_wave_runs_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![
            logging("root", &log),
            logging("x", &log).after(["root"]).parallel_safe(),
            logging("y", &log).after(["root"]).parallel_safe(),
            logging("z", &log).after(["root"]).parallel_safe(),
            logging("end", &log).after(["x", "y", "z"]),
        ]);
        let opts = ExecuteOptions {
            jobs: 3,
            ..Default::default()
        };

        let mut store = MemoryStateStore::new();
        let report = run(&plan, &opts, &mut store);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(store.saves(), 5);

        let order = invocations(&log);
        assert_eq!(order.len(), 5);
        assert_eq!(order.first().map(String::as_str), Some("root"));
        assert_eq!(order.last().map(String::as_str), Some("end"));
    }

    #[test]
    fn test_output_captured_in_record() {
        let plan = plan_of(vec![Step::new(
            "a",
            Category::Build,
            "echo hello; echo oops >&2",
        )]);
        let report = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        let output = report.get("a").unwrap().output();
        assert!(output.contains("hello"));
        assert!(output.contains("oops"));
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plan = plan_of(vec![logging("a", &log)]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = execute(
            &plan,
            &ExecuteOptions::default(),
            &mut MemoryStateStore::new(),
            &NoReporter,
            &cancel,
        )
        .unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(invocations(&log).is_empty());
    }

    #[test]
    fn test_empty_plan_completes() {
        let plan = plan_of(Vec::new());
        let report = run(&plan, &ExecuteOptions::default(), &mut MemoryStateStore::new());
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.steps.is_empty());
    }
}
