//! `rigup run` - execute the catalog

use anyhow::Result;
use provision::{Catalog, ExecuteOptions, Plan, build_plan, execute};
use std::process::ExitCode;

use super::{exit_code, load_catalog, resume_command, state_store};
use crate::Context;
use crate::cli::RunArgs;
use crate::config::{Config, Overrides};
use crate::reporter::TerminalReporter;
use crate::{signal, ui};

pub fn run(ctx: &Context, args: RunArgs) -> Result<ExitCode> {
    let config = Config::load()?;
    let catalog = load_catalog(&args.catalog, &config)?;
    let plan = select_plan(&catalog, &args.force, &args.only)?;
    let opts = options(&config, &args)?;

    let mut store = state_store(&catalog)?;
    if args.resume && !store.exists() {
        log::info!(
            "No recorded run for '{}' at {}, starting fresh",
            catalog.label(),
            store.path().display()
        );
    }

    let reporter = TerminalReporter::new(
        ctx.verbose > 0 && !args.json,
        ctx.quiet || args.json,
        !args.json,
    )
    .with_resume_command(resume_command(&catalog));
    let cancel = signal::install();

    let report = match execute(&plan, &opts, &mut store, &reporter, &cancel) {
        Ok(report) => report,
        Err(e) => {
            ui::error(&format!("Could not record step results: {e}"));
            ui::dim("Later --resume runs cannot trust this state; fix the state directory and re-run.");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(exit_code(report.outcome.exit_code()))
}

/// Validate `--force`/`--only` ids and build the (possibly restricted) plan
pub fn select_plan(catalog: &Catalog, force: &[String], only: &[String]) -> Result<Plan> {
    catalog.check_ids(force)?;
    catalog.check_ids(only)?;

    let plan = build_plan(catalog)?;
    if only.is_empty() {
        return Ok(plan);
    }
    let selected = plan.select(only)?;
    log::info!(
        "Restricted run to {} of {} steps",
        selected.len(),
        catalog.len()
    );
    Ok(selected)
}

fn options(config: &Config, args: &RunArgs) -> Result<ExecuteOptions> {
    let overrides = Overrides {
        timeout_secs: args.timeout,
        jobs: args.jobs,
        keep_going: args.keep_going,
    };
    let mut opts = config.execute_options(&overrides)?;
    opts.dry_run = args.dry_run;
    opts.resume = args.resume;
    opts.force = args.force.iter().cloned().collect();
    Ok(opts)
}
