//! Centralized path resolution for rigup
//!
//! Platform-aware path resolution with environment variable overrides, so the
//! config can live in a dotfiles repository and state can be redirected in CI.
//!
//! # Environment Variables
//!
//! - `RIGUP_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/rigup`)
//! - `RIGUP_STATE_DIR` - Override state directory (run records)
//! - `RIGUP_CATALOG` - Default catalog path when `--catalog` is not given
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `RIGUP_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/rigup` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\rigup`
//!    - macOS/Linux: `~/.config/rigup`
//!
//! For state_dir():
//! 1. `RIGUP_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/rigup` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\rigup`
//!    - macOS/Linux: `~/.local/state/rigup`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "RIGUP_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "RIGUP_STATE_DIR";

/// Environment variable naming the default catalog
pub const ENV_CATALOG: &str = "RIGUP_CATALOG";

/// Catalog used when nothing else names one
pub const DEFAULT_CATALOG: &str = "rigup.toml";

/// Get the rigup config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("rigup");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("rigup");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("rigup");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the rigup state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("rigup");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("rigup");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("rigup");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Resolve the catalog to operate on
///
/// Priority:
/// 1. `--catalog` flag
/// 2. `RIGUP_CATALOG` env var
/// 3. `default_catalog` from config.toml
/// 4. `./rigup.toml`
pub fn catalog_path(flag: Option<&Path>, configured: Option<&str>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ENV_CATALOG)
        && !path.is_empty()
    {
        log::debug!("Using catalog from {ENV_CATALOG}: {path}");
        return expand(&path);
    }
    if let Some(path) = configured {
        log::debug!("Using catalog from config: {path}");
        return expand(path);
    }
    PathBuf::from(DEFAULT_CATALOG)
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
