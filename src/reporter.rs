//! Terminal reporter: live progress while steps run, summary table at the end

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use provision::{
    ExecuteOptions, OutputStream, Plan, Reporter, RunOutcome, RunReport, Step, StepError,
    StepReport, StepStatus,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::ui;

/// Lines of captured output shown for each failed step
const FAILURE_TAIL_LINES: usize = 20;

/// Resume command when the default catalog is in use
pub const RESUME_COMMAND: &str = "rigup run --resume";

pub struct TerminalReporter {
    /// Stream command output lines as they arrive
    verbose: bool,
    /// Only failures and the summary
    quiet: bool,
    /// Print the summary table (off when the report is printed as JSON)
    summary: bool,
    /// Shown in the summary when steps were left pending
    resume_command: String,
    multi: MultiProgress,
    spinners: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalReporter {
    pub fn new(verbose: bool, quiet: bool, summary: bool) -> Self {
        let target = if quiet {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        Self::with_draw_target(verbose, quiet, summary, target)
    }

    fn with_draw_target(
        verbose: bool,
        quiet: bool,
        summary: bool,
        target: ProgressDrawTarget,
    ) -> Self {
        Self {
            verbose,
            quiet,
            summary,
            resume_command: RESUME_COMMAND.to_string(),
            multi: MultiProgress::with_draw_target(target),
            spinners: Mutex::new(HashMap::new()),
        }
    }

    /// Command suggested for continuing an incomplete run
    pub fn with_resume_command(mut self, command: impl Into<String>) -> Self {
        self.resume_command = command.into();
        self
    }

    /// Spinners are invisible (stderr is not a terminal), so print start lines instead
    fn plain_progress(&self) -> bool {
        !self.quiet && self.multi.is_hidden()
    }

    /// Print without tearing the spinners
    fn print(&self, line: &str) {
        self.multi.suspend(|| println!("{line}"));
    }

    fn take_spinner(&self, step_id: &str) -> Option<ProgressBar> {
        let mut spinners = match self.spinners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        spinners.remove(step_id)
    }
}

impl Reporter for TerminalReporter {
    fn on_plan(&self, plan: &Plan, opts: &ExecuteOptions) {
        if self.quiet {
            return;
        }
        let title = if opts.dry_run {
            format!("Dry run: {}", plan.label())
        } else {
            format!("Provisioning {}", plan.label())
        };
        self.multi.suspend(|| {
            ui::header(&title);
            ui::kv("Steps", &plan.len().to_string());
            if opts.jobs > 1 {
                ui::kv("Jobs", &opts.jobs.to_string());
            }
            if opts.resume {
                ui::kv("Mode", "resume");
            }
            if !opts.force.is_empty() {
                let mut forced: Vec<&str> = opts.force.iter().map(String::as_str).collect();
                forced.sort_unstable();
                ui::kv("Forced", &forced.join(", "));
            }
            println!();
        });
    }

    fn on_step_start(&self, position: usize, total: usize, step: &Step) {
        if self.quiet {
            return;
        }
        if self.plain_progress() {
            self.print(&start_line(position, total, step));
            return;
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {prefix:.blue.bold} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(format!("[{position}/{total}]"));
        pb.set_message(format!("{} {}", step.id.bold(), ui::truncate(step.display_name(), 60)));
        pb.enable_steady_tick(Duration::from_millis(100));

        let mut spinners = match self.spinners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        spinners.insert(step.id.clone(), pb);
    }

    fn on_output(&self, step_id: &str, stream: OutputStream, line: &str) {
        if !self.verbose {
            return;
        }
        let gutter = format!("{step_id} │").dimmed();
        let line = match stream {
            OutputStream::Stdout => line.normal(),
            OutputStream::Stderr => line.yellow(),
        };
        self.print(&format!("    {gutter} {line}"));
    }

    fn on_retry(
        &self,
        step_id: &str,
        attempt: u32,
        max_attempts: u32,
        error: &StepError,
        delay: Duration,
    ) {
        self.print(&format!(
            "  {} {} attempt {}/{} {}, retrying in {}",
            "⟳".yellow(),
            step_id.bold(),
            attempt,
            max_attempts,
            error,
            ui::format_duration(delay)
        ));
    }

    fn on_step_complete(&self, step: &Step, report: &StepReport) {
        if let Some(pb) = self.take_spinner(&step.id) {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }
        if self.quiet && report.status != StepStatus::Failed {
            return;
        }
        self.print(&completion_line(report));
    }

    fn on_run_complete(&self, report: &RunReport) {
        if !self.summary {
            return;
        }
        self.multi.suspend(|| {
            for line in summary_lines(report, &self.resume_command) {
                println!("{line}");
            }
        });
    }
}

/// Start notice printed when no spinner can be drawn
fn start_line(position: usize, total: usize, step: &Step) -> String {
    format!(
        "  {} {} {}",
        format!("[{position}/{total}]").blue().bold(),
        step.id.bold(),
        ui::truncate(step.display_name(), 60).dimmed()
    )
}

/// One line for a step that reached its final status
fn completion_line(report: &StepReport) -> String {
    let id = report.id.bold();
    let record = report.record.as_ref();
    let elapsed = record
        .and_then(|r| r.elapsed())
        .map(|d| format!("({})", ui::format_duration(d)).dimmed().to_string())
        .unwrap_or_default();

    match report.status {
        StepStatus::Succeeded => {
            let attempts = match record.map_or(1, |r| r.attempts) {
                n if n > 1 => format!(" after {n} attempts"),
                _ => String::new(),
            };
            format!("  {} {id}{attempts} {elapsed}", "✓".green())
        }
        StepStatus::Skipped => {
            let reason = record.and_then(|r| r.reason.as_deref()).unwrap_or("skipped");
            format!("  {} {id} {}", "○".cyan(), reason.dimmed())
        }
        StepStatus::Failed => {
            let error = report
                .error()
                .map_or_else(|| "failed".to_string(), ToString::to_string);
            format!("  {} {id} {} {elapsed}", "✗".red(), error.red())
        }
        StepStatus::Pending => {
            let note = report.note.as_deref().unwrap_or("not attempted");
            format!("  {} {id} {}", "·".dimmed(), note.dimmed())
        }
    }
}

fn status_cell(status: StepStatus) -> String {
    let padded = format!("{:<9}", status.as_str());
    match status {
        StepStatus::Succeeded => padded.green().to_string(),
        StepStatus::Skipped => padded.cyan().to_string(),
        StepStatus::Failed => padded.red().bold().to_string(),
        StepStatus::Pending => padded.dimmed().to_string(),
    }
}

/// Summary table, counts, failures with their output tail, and a resume hint
pub fn summary_lines(report: &RunReport, resume_command: &str) -> Vec<String> {
    let mut lines = vec![String::new()];

    let (mark, headline) = match report.outcome {
        RunOutcome::Completed if report.dry_run => ("✓".green().bold(), "Dry run complete"),
        RunOutcome::Completed => ("✓".green().bold(), "Provisioning complete"),
        RunOutcome::Failed => ("✗".red().bold(), "Provisioning failed"),
        RunOutcome::TimedOut => ("⏱".red().bold(), "Provisioning timed out"),
        RunOutcome::Cancelled => ("⚠".yellow().bold(), "Provisioning cancelled"),
    };
    lines.push(format!(
        "  {mark} {headline} in {}",
        ui::format_duration(report.elapsed)
    ));

    if !report.steps.is_empty() {
        let id_width = report
            .steps
            .iter()
            .map(|s| s.id.chars().count())
            .max()
            .unwrap_or(0)
            .max(4);

        lines.push(String::new());
        lines.push(
            format!("    {:<id_width$}  {:<8}  {:<9}  {}", "STEP", "CATEGORY", "STATUS", "TIME")
                .dimmed()
                .to_string(),
        );
        for step in &report.steps {
            let time = step
                .record
                .as_ref()
                .and_then(|r| r.elapsed())
                .filter(|_| step.status != StepStatus::Skipped)
                .map(ui::format_duration)
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "    {:<id_width$}  {:<8}  {}  {}",
                step.id,
                step.category.as_str(),
                status_cell(step.status),
                time
            ));
        }
    }

    let summary = report.summary();
    lines.push(String::new());
    if summary.succeeded > 0 {
        lines.push(format!("    • {} succeeded", summary.succeeded));
    }
    if summary.skipped > 0 {
        lines.push(format!("    • {} skipped", summary.skipped));
    }
    if summary.failed > 0 {
        lines.push(format!("    • {} {}", summary.failed, "failed".red()));
    }
    if summary.pending > 0 {
        let label = if report.dry_run { "would run or blocked" } else { "pending" };
        lines.push(format!("    • {} {label}", summary.pending));
    }
    if summary.total() == 0 {
        lines.push("    • nothing to do".to_string());
    }

    for failed in report.failed() {
        lines.push(String::new());
        let error = failed
            .error()
            .map_or_else(|| "failed".to_string(), ToString::to_string);
        lines.push(format!("  {} {}: {}", "✗".red(), failed.id.bold(), error));
        for line in ui::tail_lines(failed.output(), FAILURE_TAIL_LINES) {
            lines.push(format!("    {}", line.dimmed()));
        }
    }

    if !report.dry_run && summary.pending > 0 && !report.outcome.is_success() {
        lines.push(String::new());
        lines.push(format!(
            "  {} resume with: {}",
            "ℹ".blue(),
            resume_command.bold()
        ));
    }

    lines
}
