#![doc = include_str!("../README.md")]

//! Mosaic verification engine.
//!
//! This crate runs the block-summary protocol: one worker per block
//! exchanges post conditions (forward) and error conditions (backward)
//! until the analysis reaches a global fixpoint, a violation is confirmed at
//! the program entry, or a resource limit ends the run.

pub mod analysis;
pub mod counterexample;
pub mod domains;
pub mod result;
pub mod router;
pub mod scheduler;
pub mod tables;
mod timeout;
pub mod worker;

use std::sync::Arc;

use thiserror::Error;

use mosaic_ir::{ConfigurationError, ProgramModel};

use crate::domains::interval::{IntervalFactory, IntervalOptions};
use crate::result::VerificationReport;
use crate::scheduler::{EngineOptions, Scheduler};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("runtime failure: {0}")]
    Runtime(String),
}

/// Verify a program model with the interval domain.
pub async fn verify_model(
    model: ProgramModel,
    options: EngineOptions,
    domain: IntervalOptions,
) -> Result<VerificationReport, EngineError> {
    let graph = model.block_graph()?;
    let name = model.name.clone();
    let factory = IntervalFactory::new(Arc::new(model), domain);
    let scheduler = Scheduler::new(graph, factory, options);
    let scheduler = match name {
        Some(name) => scheduler.with_program_name(name),
        None => scheduler,
    };
    scheduler.run().await
}
