//! Error types for the provisioning engine.
//!
//! Errors are split by the phase that produces them. Catalog and cycle
//! errors happen before any step runs and are always fatal. Step errors
//! are recorded per step and surfaced in the run report. State errors
//! degrade to an empty prior state on load.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a step catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("failed to read catalog {path}: {source}")]
    Read {
        /// Path of the catalog file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Catalog file is not valid TOML/JSON or does not match the schema
    #[error("invalid catalog {path}: {message}")]
    Parse {
        /// Path of the catalog file
        path: PathBuf,
        /// Parser error message
        message: String,
    },

    /// A step was declared without an id
    #[error("step #{index} has an empty id")]
    EmptyId {
        /// 1-indexed position of the step in the catalog
        index: usize,
    },

    /// Two steps share the same id
    #[error("duplicate step id: {id}")]
    DuplicateId {
        /// The repeated id
        id: String,
    },

    /// A step declares a zero timeout, which would kill it on the first poll
    #[error("step '{id}' has timeout_secs = 0; omit it to use the default")]
    ZeroTimeout {
        /// The offending step
        id: String,
    },

    /// A prerequisite references a step that does not exist
    #[error("step '{step}' depends on unknown step '{missing}'")]
    DanglingPrerequisite {
        /// Step declaring the prerequisite
        step: String,
        /// The id that could not be resolved
        missing: String,
    },

    /// The prerequisite relation contains a cycle
    #[error("prerequisite cycle: {}", .cycle.join(" -> "))]
    Cycle {
        /// Steps along the cycle, first id repeated at the end
        cycle: Vec<String>,
    },

    /// A step id named by the caller (e.g. `--force`) is not in the catalog
    #[error("unknown step id: {id}")]
    UnknownStep {
        /// The id that was requested
        id: String,
    },
}

/// Raised by the graph builder when ordering gets stuck on a cycle.
///
/// Only reachable when a catalog skipped validation.
#[derive(Debug, Error)]
#[error("cannot order steps, cycle among: {}", .remaining.join(", "))]
pub struct CycleError {
    /// Steps that could not be placed in the plan
    pub remaining: Vec<String>,
}

impl From<CycleError> for CatalogError {
    fn from(err: CycleError) -> Self {
        CatalogError::Cycle {
            cycle: err.remaining,
        }
    }
}

/// Categories of step failure for retry logic and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Command ran and exited non-zero (or was killed by a signal)
    Execution,
    /// Command exceeded its time bound
    Timeout,
    /// Command could not be started at all
    Spawn,
}

impl ErrorCategory {
    /// Whether a retryable step should try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution | Self::Timeout)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Execution => "Command failed",
            Self::Timeout => "Command timed out",
            Self::Spawn => "Command could not be started",
        }
    }
}

/// Failure of a single step attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// Command exited non-zero; `code` is `None` when killed by a signal
    #[error("{}", describe_exit(.code))]
    Execution {
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },

    /// Command exceeded its time bound and was killed
    #[error("timed out after {limit_secs}s")]
    Timeout {
        /// The bound that was exceeded, in seconds
        limit_secs: u64,
    },

    /// Shell could not be spawned
    #[error("failed to start command: {message}")]
    Spawn {
        /// OS error message
        message: String,
    },
}

impl StepError {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StepError::Execution { .. } => ErrorCategory::Execution,
            StepError::Timeout { .. } => ErrorCategory::Timeout,
            StepError::Spawn { .. } => ErrorCategory::Spawn,
        }
    }

    /// Whether a retryable step should try again after this failure.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Errors reading or writing persisted run state.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file exists but could not be read
    #[error("failed to read state file {path}: {source}")]
    Read {
        /// Path of the state file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// State file could not be parsed
    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        /// Path of the state file
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// State file belongs to a different catalog
    #[error("state file {path} belongs to catalog {found}, expected {expected}")]
    IdentityMismatch {
        /// Path of the state file
        path: PathBuf,
        /// Identity the caller asked for
        expected: String,
        /// Identity recorded in the file
        found: String,
    },

    /// State could not be written durably
    #[error("failed to write state file {path}: {source}")]
    Write {
        /// Path of the state file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// State could not be serialized
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}
