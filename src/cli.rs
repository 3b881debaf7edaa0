use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::paths::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "stackup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Provision a cloud host and bootstrap it over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file
    #[arg(short, long, global = true, env = "STACKUP_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Stack name (overrides `stack` in the stack file)
    #[arg(short, long, global = true, env = "STACKUP_STACK")]
    pub stack: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the execution order without changing anything
    Plan(PlanArgs),

    /// Create missing resources and run the bootstrap steps
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Read provider state to tell creates from adoptions (read-only)
    #[arg(long)]
    pub refresh: bool,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel jobs within a wave
    #[arg(short, long, default_value = "1")]
    pub jobs: u16,
}
