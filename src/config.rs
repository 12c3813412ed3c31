//! User configuration (`config.toml` in the config dir)
//!
//! ```toml
//! [execution]
//! timeout_secs = 1800
//! jobs = 4
//! keep_going = false
//! default_catalog = "~/dotfiles/lab.toml"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_secs = 2.0
//! backoff_factor = 2.0
//! max_delay_secs = 60.0
//! ```
//!
//! A missing file means defaults. Command-line flags override file values.

use anyhow::{Context, Result, bail};
use provision::{DEFAULT_STEP_TIMEOUT, ExecuteOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Config file name inside the config dir
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Per-step timeout for steps without their own
    pub timeout_secs: Option<u64>,
    /// Concurrent parallel-safe steps
    pub jobs: Option<usize>,
    pub keep_going: bool,
    pub default_catalog: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub backoff_factor: f64,
    pub max_delay_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_secs: defaults.base_delay.as_secs_f64(),
            backoff_factor: defaults.backoff_factor,
            max_delay_secs: defaults.max_delay.as_secs_f64(),
        }
    }
}

impl RetrySettings {
    fn to_retry_config(&self) -> Result<RetryConfig> {
        if self.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.backoff_factor < 1.0 {
            bail!("retry.backoff_factor must be >= 1.0");
        }
        let base_delay = Duration::try_from_secs_f64(self.base_delay_secs)
            .context("retry.base_delay_secs must be a non-negative number")?;
        let max_delay = Duration::try_from_secs_f64(self.max_delay_secs)
            .context("retry.max_delay_secs must be a non-negative number")?;

        Ok(RetryConfig {
            max_attempts: self.max_attempts,
            base_delay,
            backoff_factor: self.backoff_factor,
            max_delay,
        })
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub timeout_secs: Option<u64>,
    pub jobs: Option<usize>,
    pub keep_going: bool,
}

impl Config {
    /// Path of the config file
    pub fn path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join(CONFIG_FILE))
    }

    /// Load config.toml from the config dir, defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load a config file, defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Build execution options from file values and command-line overrides
    pub fn execute_options(&self, overrides: &Overrides) -> Result<ExecuteOptions> {
        let jobs = overrides.jobs.or(self.execution.jobs).unwrap_or(1);
        if jobs == 0 {
            bail!("jobs must be at least 1");
        }

        let default_timeout = overrides
            .timeout_secs
            .or(self.execution.timeout_secs)
            .map_or(DEFAULT_STEP_TIMEOUT, Duration::from_secs);
        if default_timeout.is_zero() {
            bail!("timeout must be at least 1 second");
        }

        Ok(ExecuteOptions {
            keep_going: overrides.keep_going || self.execution.keep_going,
            jobs,
            default_timeout,
            retry: self.retry.to_retry_config()?,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[execution]
timeout_secs = 120
jobs = 4
default_catalog = "~/lab.toml"

[retry]
max_attempts = 5
base_delay_secs = 0.5
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.execution.jobs, Some(4));
        assert_eq!(config.execution.default_catalog.as_deref(), Some("~/lab.toml"));
        assert_eq!(config.retry.max_attempts, 5);
        // Unset retry fields keep their defaults
        assert!((config.retry.backoff_factor - 2.0).abs() < f64::EPSILON);

        let opts = config.execute_options(&Overrides::default()).unwrap();
        assert_eq!(opts.jobs, 4);
        assert_eq!(opts.default_timeout, Duration::from_secs(120));
        assert_eq!(opts.retry.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[execution]\nparallel = true\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = Config {
            execution: ExecutionConfig {
                timeout_secs: Some(60),
                jobs: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let overrides = Overrides {
            timeout_secs: Some(5),
            jobs: Some(8),
            keep_going: true,
        };

        let opts = config.execute_options(&overrides).unwrap();
        assert_eq!(opts.jobs, 8);
        assert_eq!(opts.default_timeout, Duration::from_secs(5));
        assert!(opts.keep_going);
    }

    #[test]
    fn test_defaults_without_file_or_flags() {
        let opts = Config::default()
            .execute_options(&Overrides::default())
            .unwrap();
        assert_eq!(opts.jobs, 1);
        assert_eq!(opts.default_timeout, DEFAULT_STEP_TIMEOUT);
        assert_eq!(opts.retry.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config::default();
        let zero_jobs = Overrides {
            jobs: Some(0),
            ..Default::default()
        };
        assert!(config.execute_options(&zero_jobs).is_err());

        let mut bad_retry = Config::default();
        bad_retry.retry.max_attempts = 0;
        assert!(bad_retry.execute_options(&Overrides::default()).is_err());
    }
}
