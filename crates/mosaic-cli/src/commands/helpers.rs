use std::path::Path;

use miette::IntoDiagnostic;

use mosaic_ir::ProgramModel;

use crate::OutputFormat;

/// Models larger than this are rejected before parsing.
pub(crate) const MAX_MODEL_BYTES: u64 = 16 * 1024 * 1024;

pub(crate) fn parse_output_format(raw: &str) -> miette::Result<OutputFormat> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => miette::bail!("Unknown output format: {other}. Use 'text' or 'json'."),
    }
}

pub(crate) fn read_model(path: &Path) -> miette::Result<ProgramModel> {
    let metadata = std::fs::metadata(path).into_diagnostic()?;
    if metadata.len() > MAX_MODEL_BYTES {
        miette::bail!(
            "Model file {} is {} bytes, exceeding the limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_MODEL_BYTES
        );
    }
    let raw = std::fs::read_to_string(path).into_diagnostic()?;
    ProgramModel::from_json(&raw)
        .map_err(|e| miette::miette!("Invalid program model {}: {e}", path.display()))
}
