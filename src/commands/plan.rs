//! `rigup plan` - validate the catalog and print the execution order

use anyhow::Result;
use colored::Colorize;
use provision::{Plan, Step, build_plan};
use std::process::ExitCode;

use super::load_catalog;
use crate::Context;
use crate::cli::CatalogArgs;
use crate::config::{Config, Overrides};
use crate::ui;

pub fn run(ctx: &Context, args: &CatalogArgs) -> Result<ExitCode> {
    let config = Config::load()?;
    let catalog = load_catalog(args, &config)?;
    let plan = build_plan(&catalog)?;
    let jobs = config.execute_options(&Overrides::default())?.jobs;

    if ctx.quiet {
        for id in plan.ids() {
            println!("{id}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    ui::header(&format!("Plan: {}", plan.label()));
    if let Some(source) = catalog.source() {
        ui::kv("Catalog", &source.display().to_string());
    }
    ui::kv("Identity", plan.identity());
    ui::kv("Steps", &plan.len().to_string());
    println!();

    if plan.is_empty() {
        ui::info("Catalog has no steps; nothing to do.");
        return Ok(ExitCode::SUCCESS);
    }

    for line in plan_lines(&plan, jobs, ctx.verbose > 0) {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Numbered steps in order, grouping steps that would run concurrently
fn plan_lines(plan: &Plan, jobs: usize, detailed: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for wave in plan.waves(jobs) {
        let grouped = wave.len() > 1;
        if grouped {
            lines.push(format!("  {}", format!("┌ {} in parallel", wave.len()).dimmed()));
        }
        for pos in wave {
            let step = &plan.steps()[pos];
            let gutter = if grouped { "│ " } else { "" };
            lines.push(format!(
                "  {}{} {} {} {}",
                gutter.dimmed(),
                format!("{:>3}.", pos + 1).blue().bold(),
                step.id.bold(),
                format!("[{}]", step.category).dimmed(),
                step.description
            ));
            if detailed {
                for detail in step_details(step) {
                    lines.push(format!("  {}       {}", gutter.dimmed(), detail.dimmed()));
                }
            }
        }
    }
    lines
}

fn step_details(step: &Step) -> Vec<String> {
    let mut details = Vec::new();
    if !step.prerequisites.is_empty() {
        details.push(format!("after: {}", step.prerequisites.join(", ")));
    }
    if let Some(check) = &step.idempotency_check {
        details.push(format!("skip when: {}", check.describe()));
    }
    let mut flags = Vec::new();
    if step.retryable {
        flags.push("retryable".to_string());
    }
    if step.parallel_safe {
        flags.push("parallel-safe".to_string());
    }
    if let Some(secs) = step.timeout_secs {
        flags.push(format!("timeout {secs}s"));
    }
    if !flags.is_empty() {
        details.push(flags.join(", "));
    }
    details
}
