//! Per-step execution records and run reports

use crate::error::StepError;
use crate::step::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Exit code for errors before any step ran (catalog, config, unknown ids)
pub const EXIT_SETUP_ERROR: i32 = 2;

/// Status of a step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not attempted
    Pending,
    /// Effect already present, command not invoked
    Skipped,
    /// Command exited 0
    Succeeded,
    /// Command failed after all attempts
    Failed,
}

impl StepStatus {
    /// Whether a resumed run may treat the step as done
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Command attempts made (0 when skipped)
    #[serde(default)]
    pub attempts: u32,
    /// Combined stdout/stderr, tail only
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Why the step was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExecutionRecord {
    /// Record for a step that is starting now
    pub fn begin() -> Self {
        Self {
            status: StepStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            output: String::new(),
            error: None,
            reason: None,
        }
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.status = StepStatus::Skipped;
        self.reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn succeed(mut self, output: String) -> Self {
        self.status = StepStatus::Succeeded;
        self.output = output;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, output: String, error: StepError) -> Self {
        self.status = StepStatus::Failed;
        self.output = output;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        self
    }

    /// Wall-clock time from start to finish
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

/// Final view of one plan step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: String,
    pub description: String,
    pub category: Category,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<ExecutionRecord>,
    /// Extra context: "would run" in dry runs, blocking prerequisite, etc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StepReport {
    /// Failure detail, if the step failed
    pub fn error(&self) -> Option<&StepError> {
        self.record.as_ref().and_then(|r| r.error.as_ref())
    }

    /// Captured output, empty when nothing ran
    pub fn output(&self) -> &str {
        self.record.as_ref().map_or("", |r| r.output.as_str())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every attempted step succeeded or was skipped
    Completed,
    /// At least one step failed
    Failed,
    /// Every failure was a timeout
    TimedOut,
    /// Operator aborted the run
    Cancelled,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed => 1,
            Self::TimedOut => 3,
            Self::Cancelled => 130,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pending: usize,
}

impl RunSummary {
    /// Total number of steps in the plan
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed + self.pending
    }

    /// Check if nothing failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Add a step status to the summary
    pub fn add(&mut self, status: StepStatus) {
        match status {
            StepStatus::Pending => self.pending += 1,
            StepStatus::Skipped => self.skipped += 1,
            StepStatus::Succeeded => self.succeeded += 1,
            StepStatus::Failed => self.failed += 1,
        }
    }
}

/// Result of a run, one entry per plan step in plan order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Catalog identity
    pub identity: String,
    /// Catalog label
    pub catalog: String,
    pub dry_run: bool,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for step in &self.steps {
            summary.add(step.status);
        }
        summary
    }

    pub fn get(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<StepStatus> {
        self.get(id).map(|s| s.status)
    }

    /// Failed steps in plan order
    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let record = ExecutionRecord::begin();
        assert_eq!(record.status, StepStatus::Pending);
        assert!(record.finished_at.is_none());

        let done = record.succeed("ok\n".into());
        assert_eq!(done.status, StepStatus::Succeeded);
        assert!(done.finished_at.is_some());
        assert!(done.elapsed().is_some());
    }

    #[test]
    fn test_failed_record_keeps_error() {
        let record = ExecutionRecord::begin()
            .fail("boom\n".into(), StepError::Execution { code: Some(1) });
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error, Some(StepError::Execution { code: Some(1) }));
    }

    #[test]
    fn test_record_json_shape() {
        let record = ExecutionRecord::begin().skip("already satisfied");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "already satisfied");
        assert!(json.get("error").is_none());
        assert!(json.get("output").is_none());

        let back: ExecutionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_status_complete() {
        assert!(StepStatus::Succeeded.is_complete());
        assert!(StepStatus::Skipped.is_complete());
        assert!(!StepStatus::Failed.is_complete());
        assert!(!StepStatus::Pending.is_complete());
    }

    #[test]
    fn test_exit_codes_distinct() {
        let codes = [
            RunOutcome::Completed.exit_code(),
            RunOutcome::Failed.exit_code(),
            RunOutcome::TimedOut.exit_code(),
            RunOutcome::Cancelled.exit_code(),
            EXIT_SETUP_ERROR,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.add(StepStatus::Succeeded);
        summary.add(StepStatus::Skipped);
        summary.add(StepStatus::Failed);
        summary.add(StepStatus::Pending);
        summary.add(StepStatus::Pending);
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.pending, 2);
        assert!(!summary.is_success());
    }
}
