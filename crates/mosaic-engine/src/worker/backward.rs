//! Backward rounds: error-condition handling.
//!
//! An error condition describes states at the sender's start (this block's
//! end) that lead to a violation further downstream. The block is explored
//! again with the condition attached; block-end states that meet it are
//! checked for feasibility and, when confirmed, the refined condition at
//! this block's start travels one hop upstream.

use tracing::{debug, warn};

use mosaic_ir::ErrorConditionMessage;

use super::{BlockWorker, RoundResult};
use crate::analysis::{LocalAnalysis, ViolationKind};

impl<A: LocalAnalysis> BlockWorker<A> {
    /// Handle an error condition from a successor.
    pub fn on_error_condition(&mut self, message: &ErrorConditionMessage) -> RoundResult {
        if !self.enter_round()? {
            return Ok(Vec::new());
        }
        let outcome = self.error_condition_round(message);
        self.leave_round(outcome)
    }

    fn error_condition_round(&mut self, message: &ErrorConditionMessage) -> RoundResult {
        let sender = message.block_id();
        if !self.block.is_successor(sender) {
            warn!(
                block = %self.block.id(),
                sender = %sender,
                "ignoring error condition from a block that is not a successor"
            );
            return Ok(Vec::new());
        }

        let status = message
            .payload()
            .status()
            .map_err(|e| self.deserialization_error(e))?;
        self.status = self.status.update(status);

        let condition = self
            .analysis
            .deserialize(message.payload())
            .map_err(|e| self.deserialization_error(e))?;

        if let Some(entry) = self.violation_conditions.get(sender) {
            for previous in entry.conditions() {
                let covered = self
                    .analysis
                    .is_covered(&condition, previous)
                    .map_err(|e| self.analysis_error(e))?;
                if covered {
                    debug!(block = %self.block.id(), sender = %sender, "error condition covered");
                    return Ok(Vec::new());
                }
            }
        }

        let trail = message.visited();
        let index = self
            .violation_conditions
            .append(sender, condition.clone(), trail.clone());

        self.rebuild_working_set()?;
        for entry in self.working_set.iter_mut() {
            self.analysis
                .attach_violation_condition(&mut entry.state, &condition);
        }
        let result = self.explore()?;

        let mut out = Vec::new();
        if let Some(violation) = result
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::ViolationCondition)
        {
            let messages = self.report_violation(violation, false, &trail)?;
            if !messages.is_empty() {
                self.violation_conditions.mark_forwarded(sender, index);
            }
            out.extend(messages);
        } else {
            debug!(
                block = %self.block.id(),
                sender = %sender,
                "no block-end state meets the error condition"
            );
        }
        self.report_error_locations(&result.violations, &mut out)?;

        if result.violations.is_empty() && !result.block_ends.is_empty() {
            let summary = self
                .analysis
                .combine(&result.block_ends)
                .map_err(|e| self.analysis_error(e))?;
            if self.config.suppress_top_postconditions && self.analysis.is_top(&summary) {
                debug!(block = %self.block.id(), "suppressing uninformative post condition");
            } else {
                out.push(self.post_condition(&summary, true));
            }
        }
        Ok(out)
    }
}
