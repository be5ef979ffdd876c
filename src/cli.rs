use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "evolution", version, about = "Autonomous code evolution with a pool of coding agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up evolution.toml and the state directory in a project
    Init {
        /// Project directory (default: current directory)
        path: Option<PathBuf>,
    },
    /// Run evolution cycles until DONE, a limit, or Ctrl-C
    Run {
        /// Stop after this many cycles
        #[arg(short = 'n', long)]
        max_cycles: Option<u32>,

        /// Build prompts without launching agents or touching the working tree
        #[arg(long)]
        dry_run: bool,

        /// Project directory (default: current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Path to config file (overrides default search)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the persisted evolution state and last known agent states
    Status {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Path to config file (overrides default search)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
