#![doc = include_str!("../README.md")]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::verify::VerifyArgs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify {
            file,
            timeout,
            round_budget,
            worker_time_budget_ms,
            format,
            widening,
            max_steps,
            max_path_length,
            keep_top_postconditions,
        } => {
            let code = commands::verify::run_verify_command(VerifyArgs {
                file,
                timeout,
                round_budget,
                worker_time_budget_ms,
                format,
                widening,
                max_steps,
                max_path_length,
                keep_top_postconditions,
            })
            .await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Graph { file, format } => {
            commands::graph::run_graph_command(file, format)?;
        }
    }

    Ok(())
}
