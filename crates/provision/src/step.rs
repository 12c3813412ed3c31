//! Step descriptors
//!
//! A [`Step`] is one declared provisioning action: the shell command to run,
//! the steps that must complete first, and an optional idempotency check
//! telling the executor the effect is already present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Kind of provisioning action a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// OS or language package installation
    Package,
    /// Service start/restart/configuration
    Service,
    /// Fetching a file or tool
    Download,
    /// Patching third-party sources or config files
    Patch,
    /// Building artifacts or images
    Build,
}

impl Category {
    /// All categories in display order
    pub const ALL: [Category; 5] = [
        Category::Package,
        Category::Service,
        Category::Download,
        Category::Patch,
        Category::Build,
    ];

    /// Lowercase label as used in catalog files
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Package => "package",
            Category::Service => "service",
            Category::Download => "download",
            Category::Patch => "patch",
            Category::Build => "build",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate answering "is this step's effect already present?"
///
/// In a catalog, a plain string is a shell command (exit 0 = satisfied) and
/// a table `{ path = "..." }` checks that a path exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdempotencyCheck {
    /// Shell command; satisfied when it exits 0
    Command(String),
    /// Satisfied when the (tilde/env expanded) path exists
    Path {
        /// Path to test
        path: String,
    },
}

impl IdempotencyCheck {
    /// Short human-readable form for reports
    pub fn describe(&self) -> String {
        match self {
            IdempotencyCheck::Command(cmd) => format!("`{cmd}`"),
            IdempotencyCheck::Path { path } => format!("path {path} exists"),
        }
    }
}

/// One provisioning action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Unique identifier within the catalog
    pub id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Kind of action
    pub category: Category,

    /// Shell command performing the action
    pub command: String,

    /// Ids of steps that must finish before this one
    #[serde(default)]
    pub prerequisites: Vec<String>,

    /// "Already satisfied?" predicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_check: Option<IdempotencyCheck>,

    /// Retry with backoff before treating a failure as final
    #[serde(default)]
    pub retryable: bool,

    /// May run concurrently with other parallel-safe steps
    #[serde(default)]
    pub parallel_safe: bool,

    /// Per-step timeout override, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Working directory for command and check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    /// Extra environment variables for command and check
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Step {
    /// Create a step with no prerequisites and no idempotency check
    pub fn new(id: impl Into<String>, category: Category, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            category,
            command: command.into(),
            prerequisites: Vec::new(),
            idempotency_check: None,
            retryable: false,
            parallel_safe: false,
            timeout_secs: None,
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn after<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites
            .extend(prerequisites.into_iter().map(Into::into));
        self
    }

    pub fn with_check(mut self, check: IdempotencyCheck) -> Self {
        self.idempotency_check = Some(check);
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn parallel_safe(mut self) -> Self {
        self.parallel_safe = true;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Description if set, otherwise the id
    pub fn display_name(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }

    /// Effective timeout given the engine-wide default
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map_or(default, Duration::from_secs)
    }

    /// Expanded working directory, if one was declared
    pub fn resolved_workdir(&self) -> Option<PathBuf> {
        self.workdir.as_deref().map(expand)
    }

    /// Whether `id` is a direct prerequisite of this step
    pub fn depends_on(&self, id: &str) -> bool {
        self.prerequisites.iter().any(|p| p == id)
    }
}

/// Expand `~` and environment variables, leaving the input untouched on lookup failure.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
