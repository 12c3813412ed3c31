//! Subcommand implementations

pub mod plan;
pub mod reset;
pub mod run;
pub mod status;

use anyhow::Result;
use provision::{Catalog, FileStateStore};
use std::path::Path;
use std::process::ExitCode;

use crate::cli::CatalogArgs;
use crate::config::Config;
use crate::paths;
use crate::reporter::RESUME_COMMAND;

/// Resolve and load the catalog named on the command line, in the env, or in config
pub fn load_catalog(args: &CatalogArgs, config: &Config) -> Result<Catalog> {
    let path = paths::catalog_path(
        args.catalog.as_deref(),
        config.execution.default_catalog.as_deref(),
    );
    log::debug!("Loading catalog {}", path.display());
    let catalog = Catalog::load(&path)?;
    log::info!(
        "Loaded {} steps from {} (identity {})",
        catalog.len(),
        path.display(),
        catalog.identity()
    );
    Ok(catalog)
}

/// State file for a catalog
pub fn state_store(catalog: &Catalog) -> Result<FileStateStore> {
    let dir = paths::state_dir()?;
    Ok(FileStateStore::new(&dir, catalog.identity(), &catalog.label()))
}

/// Command that continues an incomplete run of `catalog`
pub fn resume_command(catalog: &Catalog) -> String {
    match catalog.source() {
        Some(path) if path != Path::new(paths::DEFAULT_CATALOG) => {
            let shown = path.display().to_string();
            if shown.contains(char::is_whitespace) {
                format!("{RESUME_COMMAND} --catalog '{shown}'")
            } else {
                format!("{RESUME_COMMAND} --catalog {shown}")
            }
        }
        _ => RESUME_COMMAND.to_string(),
    }
}

/// Convert an engine exit code to a process exit code
pub fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision::{Category, Step};
    use std::fs;

    const CATALOG: &str = "[[steps]]\nid = \"a\"\ncategory = \"build\"\ncommand = \"true\"\n";

    #[test]
    fn test_resume_command_names_non_default_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qemu lab.toml");
        fs::write(&path, CATALOG).unwrap();
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(
            resume_command(&catalog),
            format!("rigup run --resume --catalog '{}'", path.display())
        );
    }

    #[test]
    fn test_resume_command_for_default_catalog() {
        let inline = Catalog::from_steps(vec![Step::new("a", Category::Build, "true")]).unwrap();
        assert_eq!(resume_command(&inline), RESUME_COMMAND);
    }
}
