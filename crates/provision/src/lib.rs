//! # Provision
//!
//! Engine for declarative, idempotent environment provisioning.
//!
//! A catalog declares steps (packages, services, downloads, patches, builds)
//! with prerequisites and an optional "already satisfied?" check. The engine
//! orders them, skips what is already done, runs the rest, and records the
//! outcome of every step so an interrupted run can resume where it stopped.
//!
//! ## Core Concepts
//!
//! - **Catalog**: Validated step descriptors with a content identity
//! - **Plan**: Steps in a dependency-respecting, deterministic order
//! - **Executor**: Runs a plan with retries, timeouts, halting and resume
//! - **StateStore**: Durable per-step records keyed by catalog identity
//!
//! ## Example
//!
//! ```no_run
//! use provision::{
//!     Catalog, CancelToken, ExecuteOptions, FileStateStore, NoReporter, build_plan, execute,
//! };
//! use std::path::Path;
//!
//! let catalog = Catalog::load(Path::new("rigup.toml")).expect("invalid catalog");
//! let plan = build_plan(&catalog).expect("catalog was validated");
//!
//! let mut store = FileStateStore::new(Path::new("/tmp/state"), plan.identity(), plan.label());
//! let opts = ExecuteOptions {
//!     resume: true,
//!     ..Default::default()
//! };
//!
//! let report = execute(&plan, &opts, &mut store, &NoReporter, &CancelToken::new())
//!     .expect("state is writable");
//! std::process::exit(report.outcome.exit_code());
//! ```
//!
//! ## Provider Traits
//!
//! The engine does no terminal I/O and installs no signal handlers:
//!
//! - [`Reporter`]: Receives progress, output lines and the final report
//! - [`StateStore`]: Persists records ([`FileStateStore`], [`MemoryStateStore`])
//! - [`CancelToken`]: Set by the caller to stop before the next step

pub mod catalog;
pub mod command;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod record;
pub mod retry;
pub mod state;
pub mod step;

// Re-export main types at crate root
pub use catalog::{Catalog, CatalogFormat};
pub use context::{
    CancelToken, DEFAULT_STEP_TIMEOUT, ExecuteOptions, NoReporter, OutputStream, Reporter,
};
pub use error::{CatalogError, CycleError, ErrorCategory, StateError, StepError};
pub use executor::{RESUMED_REASON, execute};
pub use graph::{Plan, build_plan};
pub use record::{
    EXIT_SETUP_ERROR, ExecutionRecord, RunOutcome, RunReport, RunSummary, StepReport, StepStatus,
};
pub use retry::{RetryCallback, RetryConfig};
pub use state::{FileStateStore, MemoryStateStore, Records, StateStore};
pub use step::{Category, IdempotencyCheck, Step};
