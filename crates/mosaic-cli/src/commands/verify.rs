// Command handler for: Verify
//
// Loads a program model, runs the block-summary engine with the interval
// domain and renders the report.

use std::io::Write;
use std::path::PathBuf;

use miette::IntoDiagnostic;
use tracing::info;

use mosaic_engine::domains::interval::IntervalOptions;
use mosaic_engine::result::{VerificationReport, VerificationResult};
use mosaic_engine::scheduler::EngineOptions;

use super::helpers::{parse_output_format, read_model};
use crate::OutputFormat;

pub(crate) struct VerifyArgs {
    pub file: PathBuf,
    pub timeout: u64,
    pub round_budget: usize,
    pub worker_time_budget_ms: u64,
    pub format: String,
    pub widening: usize,
    pub max_steps: usize,
    pub max_path_length: usize,
    pub keep_top_postconditions: bool,
}

impl VerifyArgs {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            timeout_secs: self.timeout,
            worker_round_budget: self.round_budget,
            worker_time_budget_ms: self.worker_time_budget_ms,
            suppress_top_postconditions: !self.keep_top_postconditions,
        }
    }

    fn interval_options(&self) -> IntervalOptions {
        IntervalOptions {
            widening_threshold: self.widening,
            max_exploration_steps: self.max_steps,
            max_path_length: self.max_path_length,
        }
    }
}

/// Process exit code for a verdict.
pub(crate) fn verdict_exit_code(result: &VerificationResult) -> i32 {
    match result {
        VerificationResult::Safe => 0,
        VerificationResult::Unsafe { .. } => 1,
        VerificationResult::Unknown { .. } => 2,
    }
}

pub(crate) fn render_report(report: &VerificationReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => report.to_string(),
        OutputFormat::Json => report.to_json_pretty(),
    }
}

pub(crate) async fn run_verify_command(args: VerifyArgs) -> miette::Result<i32> {
    let output_format = parse_output_format(&args.format)?;
    let model = read_model(&args.file)?;
    info!(
        file = %args.file.display(),
        blocks = model.blocks.len(),
        "loaded program model"
    );

    let report = mosaic_engine::verify_model(model, args.engine_options(), args.interval_options())
        .await
        .map_err(|e| miette::miette!("Verification of {} failed: {e}", args.file.display()))?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", render_report(&report, output_format)).into_diagnostic()?;
    stdout.flush().into_diagnostic()?;
    Ok(verdict_exit_code(&report.result))
}
