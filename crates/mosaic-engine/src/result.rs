use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use mosaic_ir::{AlgorithmStatus, BlockId, MessageKind};

use crate::counterexample::Counterexample;

/// Verdict of a verification run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum VerificationResult {
    /// Global fixpoint reached with a sound status and no confirmed violation.
    Safe,
    /// A violation is reachable from the program entry.
    Unsafe { counterexample: Counterexample },
    /// The run ended without a verdict.
    Unknown { reason: String },
}

impl VerificationResult {
    /// Machine-readable verdict class.
    pub fn verdict_class(&self) -> &'static str {
        match self {
            VerificationResult::Safe => "safe",
            VerificationResult::Unsafe { .. } => "unsafe",
            VerificationResult::Unknown { .. } => "unknown",
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, VerificationResult::Safe)
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, VerificationResult::Unsafe { .. })
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Safe => {
                writeln!(f, "RESULT: SAFE")?;
                write!(f, "No error location is reachable.")
            }
            VerificationResult::Unsafe { counterexample } => {
                writeln!(f, "RESULT: UNSAFE")?;
                write!(f, "{counterexample}")
            }
            VerificationResult::Unknown { reason } => {
                writeln!(f, "RESULT: UNKNOWN")?;
                write!(f, "Reason: {reason}")
            }
        }
    }
}

/// Counters collected by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    /// Rounds completed by each worker, initial analysis included.
    pub rounds_per_block: BTreeMap<BlockId, usize>,
    /// Messages delivered to workers, by kind.
    pub messages_routed: BTreeMap<MessageKind, usize>,
    /// Blocks whose preconditions reached a fixpoint.
    pub fixpoint_blocks: Vec<BlockId>,
    /// Messages addressed to workers that had already stopped.
    pub lost_messages: usize,
    pub elapsed_ms: u64,
}

impl RunStatistics {
    pub fn total_rounds(&self) -> usize {
        self.rounds_per_block.values().sum()
    }

    pub fn total_messages(&self) -> usize {
        self.messages_routed.values().sum()
    }

    pub(crate) fn record_routed(&mut self, kind: MessageKind, receivers: usize) {
        *self.messages_routed.entry(kind).or_default() += receivers;
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub program: Option<String>,
    pub blocks: usize,
    pub result: VerificationResult,
    /// Status merged over all workers.
    pub status: AlgorithmStatus,
    pub statistics: RunStatistics,
}

impl VerificationReport {
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(program) = &self.program {
            writeln!(f, "Program: {program}")?;
        }
        writeln!(f, "{}", self.result)?;
        writeln!(f, "Status: {}", self.status)?;
        write!(
            f,
            "Blocks: {}, rounds: {}, messages: {}, fixpoint blocks: {}, elapsed: {} ms",
            self.blocks,
            self.statistics.total_rounds(),
            self.statistics.total_messages(),
            self.statistics.fixpoint_blocks.len(),
            self.statistics.elapsed_ms
        )
    }
}
