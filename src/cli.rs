use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rigup")]
#[command(version)]
#[command(about = "Declarative, idempotent environment provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v shows command output, -vv debug logs)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the catalog: skip what is already done, run the rest
    Run(RunArgs),

    /// Validate the catalog and print the execution order
    Plan(CatalogArgs),

    /// Show recorded step results for the catalog
    Status(CatalogArgs),

    /// Delete recorded step results for the catalog
    Reset(ResetArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Clone)]
pub struct CatalogArgs {
    /// Catalog file (TOML or JSON) [default: $RIGUP_CATALOG, config, ./rigup.toml]
    #[arg(short, long)]
    pub catalog: Option<PathBuf>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Skip steps recorded as succeeded or skipped by the previous run
    #[arg(long)]
    pub resume: bool,

    /// Re-run steps even if recorded or already satisfied
    #[arg(long, value_name = "ID", num_args = 1.., action = clap::ArgAction::Append)]
    pub force: Vec<String>,

    /// Run only these steps and their prerequisites; a fresh run forgets only their records
    #[arg(long, value_name = "ID", num_args = 1.., action = clap::ArgAction::Append)]
    pub only: Vec<String>,

    /// Evaluate checks and show what would run, without running or recording
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Keep running independent steps after a failure
    #[arg(short, long)]
    pub keep_going: bool,

    /// Maximum parallel-safe steps to run at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Default per-step timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ResetArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "rigup", "-v", "run", "--catalog", "lab.toml", "--resume", "--force", "a", "--force",
            "b", "--only", "c", "--jobs", "4", "--timeout", "60", "--json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.catalog.catalog, Some(PathBuf::from("lab.toml")));
        assert!(args.resume && args.json && !args.dry_run);
        assert_eq!(args.force, ["a", "b"]);
        assert_eq!(args.only, ["c"]);
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.timeout, Some(60));
    }

    #[test]
    fn test_several_ids_after_one_flag() {
        let cli = Cli::try_parse_from([
            "rigup", "run", "--force", "a", "b", "--only", "c", "d", "--force", "e", "-k",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.force, ["a", "b", "e"]);
        assert_eq!(args.only, ["c", "d"]);
        assert!(args.keep_going);
    }

    #[test]
    fn test_reset_yes() {
        let cli = Cli::try_parse_from(["rigup", "reset", "-y", "-q"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(cli.command, Command::Reset(ResetArgs { yes: true, .. })));
    }
}
