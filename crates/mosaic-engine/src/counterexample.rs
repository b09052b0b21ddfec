use serde::Serialize;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use mosaic_ir::{BlockId, Location};

use crate::analysis::{AnalysisError, Feasibility, LocalAnalysis, Violation};

/// Steps of a violating path inside one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathFragment {
    pub block: BlockId,
    pub steps: Vec<String>,
}

/// A confirmed violation: a path from the program entry into a violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counterexample {
    /// Blocks traversed, program entry first.
    pub blocks: Vec<BlockId>,
    /// Where the entry block's fragment ends.
    pub entry_target: Location,
    /// Path through the entry block.
    pub entry_fragment: PathFragment,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self
            .blocks
            .iter()
            .map(BlockId::as_str)
            .collect::<Vec<_>>()
            .join(" -> ");
        writeln!(f, "blocks: {chain}")?;
        writeln!(f, "entry block {} reaches {}:", self.entry_fragment.block, self.entry_target)?;
        for step in &self.entry_fragment.steps {
            writeln!(f, "  {step}")?;
        }
        Ok(())
    }
}

/// A feasible path together with the refined violation condition at the
/// block start.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedPath<S> {
    pub fragment: PathFragment,
    pub condition: S,
}

/// Result of running the extractor on one violation.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<S> {
    /// Paths exist; never empty.
    Confirmed(Vec<ConfirmedPath<S>>),
    /// The violation is spurious under the given preconditions.
    Refuted,
    /// Feasibility could not be decided.
    Unconfirmed { reason: String },
}

/// Turns a violation found inside a block into feasibility-checked paths.
///
/// Solver or domain failures are never propagated: they downgrade to
/// [`Extraction::Unconfirmed`]. Only cancellation escapes as an error.
pub struct CounterexampleExtractor;

impl CounterexampleExtractor {
    pub fn extract<A: LocalAnalysis>(
        analysis: &mut A,
        block: &BlockId,
        violation: &Violation<A::State>,
        preconditions: &A::State,
        cancel: &CancellationToken,
    ) -> Result<Extraction<A::State>, AnalysisError> {
        match analysis.check_feasibility(violation, preconditions, cancel) {
            Ok(Feasibility::Feasible(paths)) if paths.is_empty() => Ok(Extraction::Refuted),
            Ok(Feasibility::Feasible(paths)) => Ok(Extraction::Confirmed(
                paths
                    .into_iter()
                    .map(|p| ConfirmedPath {
                        fragment: PathFragment {
                            block: block.clone(),
                            steps: p.steps,
                        },
                        condition: p.condition,
                    })
                    .collect(),
            )),
            Ok(Feasibility::Infeasible) => Ok(Extraction::Refuted),
            Ok(Feasibility::Unknown { reason }) => Ok(Extraction::Unconfirmed { reason }),
            Err(AnalysisError::Cancelled) => Err(AnalysisError::Cancelled),
            Err(err) => {
                warn!(
                    block = %block,
                    location = %violation.location,
                    error = %err,
                    "feasibility check failed; violation stays unconfirmed"
                );
                Ok(Extraction::Unconfirmed {
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_chain_and_steps() {
        let cex = Counterexample {
            blocks: vec![BlockId::new("A"), BlockId::new("B")],
            entry_target: Location::new(1),
            entry_fragment: PathFragment {
                block: BlockId::new("A"),
                steps: vec!["N0 -> N1: x := 5".into()],
            },
        };
        let text = cex.to_string();
        assert!(text.contains("blocks: A -> B"));
        assert!(text.contains("entry block A reaches N1"));
        assert!(text.contains("  N0 -> N1: x := 5"));
    }
}
