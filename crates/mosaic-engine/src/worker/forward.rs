//! Forward rounds: initial analysis and post-condition handling.

use tracing::{debug, warn};

use mosaic_ir::{BlockSummaryMessage, PostConditionMessage};

use super::{BlockWorker, RoundResult, WorkerError, WorkerState};
use crate::analysis::{ExplorationResult, LocalAnalysis};

impl<A: LocalAnalysis> BlockWorker<A> {
    /// Explore the block once from the initial state at its start.
    pub fn perform_initial_analysis(&mut self) -> RoundResult {
        if self.state != WorkerState::Idle {
            return Err(self.protocol_violation(format!(
                "initial analysis requested while worker is {}",
                self.state
            )));
        }
        self.state = WorkerState::Initializing;
        let outcome = self.initial_round();
        self.leave_round(outcome)
    }

    fn initial_round(&mut self) -> RoundResult {
        let start = self.block.start();
        let initial = self.analysis.initial_state(start);
        let precision = self.analysis.initial_precision(start);
        self.working_set.clear();
        self.working_set.push(initial, precision);
        let result = self.explore()?;
        self.forward_messages(&result)
    }

    /// Handle a post condition from a predecessor.
    pub fn on_post_condition(&mut self, message: &PostConditionMessage) -> RoundResult {
        if !self.enter_round()? {
            return Ok(Vec::new());
        }
        let outcome = self.post_condition_round(message);
        self.leave_round(outcome)
    }

    fn post_condition_round(&mut self, message: &PostConditionMessage) -> RoundResult {
        let sender = message.block_id();
        if !self.block.is_predecessor(sender) {
            warn!(
                block = %self.block.id(),
                sender = %sender,
                "ignoring post condition from a block that is not a predecessor"
            );
            return Ok(Vec::new());
        }

        let status = message
            .payload()
            .status()
            .map_err(|e| self.deserialization_error(e))?;
        self.status = self.status.update(status);

        let state = if message.reachable() {
            Some(
                self.analysis
                    .deserialize(message.payload())
                    .map_err(|e| self.deserialization_error(e))?,
            )
        } else {
            None
        };

        let from_loop = self.block.is_loop_predecessor(sender);
        let ignore = from_loop
            && !message.full_path()
            && state.as_ref().map_or(true, |s| self.analysis.is_top(s));

        if self.is_covered_by_previous(message, state.as_ref(), ignore)? {
            self.preconditions.mark_sound(sender);
            debug!(block = %self.block.id(), sender = %sender, "post condition covered");
            return Ok(Vec::new());
        }

        self.preconditions
            .update(sender, message.clone(), state, ignore);
        if ignore {
            debug!(
                block = %self.block.id(),
                sender = %sender,
                "loop predecessor summary carries no information yet"
            );
        }

        if self.preconditions.all_sound() {
            return Ok(Vec::new());
        }

        self.rebuild_working_set()?;
        let result = self.explore()?;
        let mut out = self.forward_messages(&result)?;
        self.recheck_violation_conditions(&mut out)?;
        Ok(out)
    }

    /// A message is covered when the sender's previous message subsumes it.
    /// Unreachable summaries add nothing once any message was received.
    /// An ignored entry covers exactly the messages that would be ignored
    /// again, so an informative summary always clears the flag.
    fn is_covered_by_previous(
        &self,
        message: &PostConditionMessage,
        state: Option<&A::State>,
        ignore: bool,
    ) -> Result<bool, WorkerError> {
        let Some(entry) = self.preconditions.get(message.block_id()) else {
            return Ok(false);
        };
        if entry.last_message().is_none() {
            return Ok(false);
        }
        if entry.ignore() {
            return Ok(ignore);
        }
        match (state, entry.state()) {
            (None, _) => Ok(true),
            (Some(_), None) => Ok(false),
            (Some(new), Some(previous)) => self
                .analysis
                .is_covered(new, previous)
                .map_err(|e| self.analysis_error(e)),
        }
    }

    /// Messages after a forward exploration: one post condition plus error
    /// conditions for newly reached error locations.
    fn forward_messages(
        &mut self,
        result: &ExplorationResult<A::State, A::Precision>,
    ) -> Result<Vec<BlockSummaryMessage>, WorkerError> {
        if result.block_ends.is_empty() && result.violations.is_empty() {
            debug!(block = %self.block.id(), "block end unreachable");
            return Ok(vec![self.unreachable_post_condition()]);
        }
        let summary = self
            .analysis
            .combine(&result.block_ends)
            .map_err(|e| self.analysis_error(e))?;
        let mut out = vec![self.post_condition(&summary, true)];
        self.report_error_locations(&result.violations, &mut out)?;
        Ok(out)
    }
}
