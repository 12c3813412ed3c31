//! `rigup status` - recorded step results for the current catalog

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use provision::state::StateDocument;
use provision::{FileStateStore, Plan, Records, RunSummary, StepStatus, build_plan};
use std::process::ExitCode;

use super::{load_catalog, resume_command, state_store};
use crate::Context;
use crate::cli::CatalogArgs;
use crate::config::Config;
use crate::ui;

pub fn run(ctx: &Context, args: &CatalogArgs) -> Result<ExitCode> {
    let config = Config::load()?;
    let catalog = load_catalog(args, &config)?;
    let plan = build_plan(&catalog)?;
    let store = state_store(&catalog)?;

    let Some(document) = recorded(&store) else {
        ui::info(&format!(
            "No recorded run for '{}' (identity {})",
            plan.label(),
            plan.identity()
        ));
        return Ok(ExitCode::SUCCESS);
    };

    ui::header(&format!("Status: {}", plan.label()));
    ui::kv("Identity", plan.identity());
    ui::kv(
        "Updated",
        &document
            .updated_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );
    if ctx.verbose > 0 {
        ui::kv("State file", &store.path().display().to_string());
    }
    println!();

    for line in status_lines(&plan, &document.records) {
        println!("{line}");
    }

    let summary = summarize(&plan, &document.records);
    println!();
    ui::dim(&format!(
        "{} succeeded, {} skipped, {} failed, {} pending",
        summary.succeeded, summary.skipped, summary.failed, summary.pending
    ));
    if summary.failed + summary.pending > 0 {
        ui::dim(&format!("Continue with: {}", resume_command(&catalog)));
    }
    Ok(ExitCode::SUCCESS)
}

/// Recorded run, treating unreadable state like a run that was never recorded
fn recorded(store: &FileStateStore) -> Option<StateDocument> {
    match store.read_document() {
        Ok(document) => document,
        Err(e) => {
            log::warn!("Ignoring unusable run state: {e}");
            None
        }
    }
}

fn summarize(plan: &Plan, records: &Records) -> RunSummary {
    let mut summary = RunSummary::default();
    for id in plan.ids() {
        summary.add(records.get(id).map_or(StepStatus::Pending, |r| r.status));
    }
    summary
}

/// One line per plan step with its recorded status
fn status_lines(plan: &Plan, records: &Records) -> Vec<String> {
    let width = plan.ids().map(|id| id.chars().count()).max().unwrap_or(0);
    plan.steps()
        .iter()
        .map(|step| {
            let Some(record) = records.get(&step.id) else {
                return format!("  {} {:<width$}  {}", "·".dimmed(), step.id, "pending".dimmed());
            };
            let mark = match record.status {
                StepStatus::Succeeded => "✓".green(),
                StepStatus::Skipped => "○".cyan(),
                StepStatus::Failed => "✗".red(),
                StepStatus::Pending => "·".dimmed(),
            };
            let when = record
                .finished_at
                .unwrap_or(record.started_at)
                .with_timezone(&Local)
                .format("%H:%M:%S")
                .to_string();
            let detail = match (&record.error, &record.reason) {
                (Some(error), _) => error.to_string().red().to_string(),
                (None, Some(reason)) => reason.dimmed().to_string(),
                (None, None) => String::new(),
            };
            format!(
                "  {mark} {:<width$}  {:<9}  {}  {detail}",
                step.id,
                record.status.as_str(),
                when.dimmed()
            )
        })
        .collect()
}
