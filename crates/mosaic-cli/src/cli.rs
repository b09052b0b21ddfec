//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Verifies programs by block summaries: every block of a decomposed program is\n\
    analysed by its own worker, post conditions flow forward along the block\n\
    graph and error conditions flow backward until a fixpoint or a confirmed\n\
    counterexample is reached.\n\n\
    Exit codes of `verify`: 0 safe, 1 unsafe, 2 unknown.";

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "Distributed block-summary verifier")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Verify a program model
    Verify {
        /// Path to the JSON program model
        file: PathBuf,

        /// Timeout in seconds (0 disables it)
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Rounds a single block worker may run (0 disables the limit)
        #[arg(long, default_value_t = 10_000)]
        round_budget: usize,

        /// Analysis time a single block worker may spend, in ms (0 disables it)
        #[arg(long, default_value_t = 0)]
        worker_time_budget_ms: u64,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,

        /// Joins at one location before the interval domain widens
        #[arg(long, default_value_t = 3)]
        widening: usize,

        /// Worklist steps per block exploration
        #[arg(long, default_value_t = 10_000)]
        max_steps: usize,

        /// Longest path (in edges) followed when confirming a violation
        #[arg(long, default_value_t = 64)]
        max_path_length: usize,

        /// Send post conditions that carry no information after backward rounds
        #[arg(long, default_value_t = false)]
        keep_top_postconditions: bool,
    },
    /// Print the block graph of a program model
    Graph {
        /// Path to the JSON program model
        file: PathBuf,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },
}
