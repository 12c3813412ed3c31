//! `rigup reset` - forget recorded step results so the next run starts fresh

use anyhow::{Context as _, Result};
use dialoguer::Confirm;
use provision::StateStore;
use std::process::ExitCode;

use super::{load_catalog, state_store};
use crate::Context;
use crate::cli::ResetArgs;
use crate::config::Config;
use crate::ui;

pub fn run(ctx: &Context, args: &ResetArgs) -> Result<ExitCode> {
    let config = Config::load()?;
    let catalog = load_catalog(&args.catalog, &config)?;
    let mut store = state_store(&catalog)?;

    if !store.exists() {
        if !ctx.quiet {
            ui::info(&format!("No recorded run for '{}'", catalog.label()));
        }
        return Ok(ExitCode::SUCCESS);
    }

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete recorded results for '{}'? The next --resume will start from the beginning",
                catalog.label()
            ))
            .default(false)
            .interact()
            .context("Confirmation needs a terminal; pass --yes")?;
        if !confirmed {
            ui::dim("Cancelled");
            return Ok(ExitCode::SUCCESS);
        }
    }

    store.clear()?;
    log::debug!("Removed {}", store.path().display());
    if !ctx.quiet {
        ui::success(&format!("Reset recorded results for '{}'", catalog.label()));
    }
    Ok(ExitCode::SUCCESS)
}
