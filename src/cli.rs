use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloudup")]
#[command(version)]
#[command(about = "Converge cluster infrastructure from a declarative cluster file", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
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
    /// Converge the cluster's cloud resources
    Update(UpdateArgs),

    /// Show what `update` would change, without changing anything
    Plan(PlanArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Where an update is rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    /// Call the cloud API directly
    #[default]
    Direct,
    /// Write Terraform JSON to --out
    Terraform,
    /// Report planned changes only
    DryRun,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Cluster file (TOML)
    pub cluster: PathBuf,

    /// Rendering target
    #[arg(long, value_enum, default_value_t = TargetArg::Direct)]
    pub target: TargetArg,

    /// Output directory for the terraform target
    #[arg(long, default_value = "out")]
    pub out: PathBuf,

    /// Cloud state file (default: $CLOUDUP_STATE_DIR/cloud.json)
    #[arg(long, env = "CLOUDUP_STATE_FILE")]
    pub state: Option<PathBuf>,

    /// Number of tasks to run in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Retries for transient cloud API failures
    #[arg(long, default_value = "4")]
    pub retries: u32,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Cluster file (TOML)
    pub cluster: PathBuf,

    /// Cloud state file (default: $CLOUDUP_STATE_DIR/cloud.json)
    #[arg(long, env = "CLOUDUP_STATE_FILE")]
    pub state: Option<PathBuf>,
}
