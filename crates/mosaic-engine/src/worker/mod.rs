//! Block worker: the per-block state machine of the summary protocol.
//!
//! A worker owns the local analysis of its block together with the
//! precondition table, the violation-condition table and the working set.
//! Every call to one of the `on_*` handlers is one *round*: it consumes a
//! message, possibly re-explores the block, and returns the messages to send.
//!
//! ```text
//! Idle --perform_initial_analysis--> Initializing --> Waiting
//! Waiting --on_post_condition / on_error_condition--> Analyzing --> Waiting
//! any --cancel / error--> Terminated
//! ```

mod backward;
mod forward;

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mosaic_ir::{
    AlgorithmStatus, Block, BlockGraph, BlockId, BlockSummaryMessage, DeserializationError,
    ErrorConditionMessage, Location, Payload, PostConditionMessage,
};

use crate::analysis::{
    AnalysisError, ExplorationResult, LocalAnalysis, Violation, ViolationKind, WorkingSet,
};
use crate::counterexample::{Counterexample, CounterexampleExtractor, Extraction};
use crate::tables::{PreconditionTable, ViolationConditionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Idle,
    Initializing,
    Waiting,
    Analyzing,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Initializing => "initializing",
            WorkerState::Waiting => "waiting",
            WorkerState::Analyzing => "analyzing",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("analysis of block '{block}' failed: {source}")]
    Analysis {
        block: BlockId,
        #[source]
        source: AnalysisError,
    },
    #[error("block '{block}' received a malformed message: {source}")]
    Deserialization {
        block: BlockId,
        #[source]
        source: DeserializationError,
    },
    #[error("protocol violation in block '{block}': {reason}")]
    ProtocolViolation { block: BlockId, reason: String },
    #[error("block '{block}' was cancelled")]
    Cancelled { block: BlockId },
}

impl WorkerError {
    pub fn block(&self) -> &BlockId {
        match self {
            WorkerError::Analysis { block, .. }
            | WorkerError::Deserialization { block, .. }
            | WorkerError::ProtocolViolation { block, .. }
            | WorkerError::Cancelled { block } => block,
        }
    }
}

/// Static facts about a worker's position in the block graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// The block starts at the program entry.
    pub is_root: bool,
    /// The block lies on a cycle of the block graph.
    pub on_cycle: bool,
    /// Do not send post conditions that carry no information after a
    /// backward round.
    pub suppress_top_postconditions: bool,
}

impl WorkerConfig {
    pub fn for_block(graph: &BlockGraph, id: &BlockId) -> Self {
        Self {
            is_root: graph.root() == id,
            on_cycle: graph.lies_on_cycle(id),
            suppress_top_postconditions: true,
        }
    }

    #[must_use]
    pub fn with_top_suppression(mut self, suppress: bool) -> Self {
        self.suppress_top_postconditions = suppress;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            is_root: false,
            on_cycle: false,
            suppress_top_postconditions: true,
        }
    }
}

pub type RoundResult = Result<Vec<BlockSummaryMessage>, WorkerError>;

pub struct BlockWorker<A: LocalAnalysis> {
    block: Block,
    config: WorkerConfig,
    analysis: A,
    state: WorkerState,
    preconditions: PreconditionTable<A::State>,
    violation_conditions: ViolationConditionTable<A::State>,
    working_set: WorkingSet<A::State, A::Precision>,
    status: AlgorithmStatus,
    reported_violations: BTreeSet<Location>,
    confirmed: Option<Counterexample>,
    rounds: usize,
    cancel: CancellationToken,
}

impl<A: LocalAnalysis> BlockWorker<A> {
    pub fn new(block: Block, analysis: A, config: WorkerConfig, cancel: CancellationToken) -> Self {
        Self {
            preconditions: PreconditionTable::for_block(&block),
            violation_conditions: ViolationConditionTable::for_block(&block),
            block,
            config,
            analysis,
            state: WorkerState::Idle,
            working_set: WorkingSet::new(),
            status: AlgorithmStatus::SOUND_AND_PRECISE,
            reported_violations: BTreeSet::new(),
            confirmed: None,
            rounds: 0,
            cancel,
        }
    }

    pub fn id(&self) -> &BlockId {
        self.block.id()
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn config(&self) -> WorkerConfig {
        self.config
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Status accumulated over all rounds and received messages.
    pub fn status(&self) -> AlgorithmStatus {
        self.status
    }

    /// Completed rounds, including the initial analysis.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }

    pub fn preconditions(&self) -> &PreconditionTable<A::State> {
        &self.preconditions
    }

    pub fn violation_conditions(&self) -> &ViolationConditionTable<A::State> {
        &self.violation_conditions
    }

    pub fn working_set(&self) -> &WorkingSet<A::State, A::Precision> {
        &self.working_set
    }

    /// Locations whose violations have been reported upstream.
    pub fn reported_violations(&self) -> &BTreeSet<Location> {
        &self.reported_violations
    }

    /// Forward fixpoint: every predecessor's latest summary was covered by
    /// the one before it.
    pub fn is_fixpoint_reached(&self) -> bool {
        self.preconditions.all_sound()
    }

    /// A violation confirmed from the program entry, if this block found one.
    pub fn take_confirmed_violation(&mut self) -> Option<Counterexample> {
        self.confirmed.take()
    }

    /// Cooperative cancellation; idempotent.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.terminate();
    }

    pub fn terminate(&mut self) {
        if self.state != WorkerState::Terminated {
            debug!(block = %self.block.id(), rounds = self.rounds, "worker terminated");
        }
        self.state = WorkerState::Terminated;
    }

    /// Dispatch a message to the matching handler.
    pub fn handle(&mut self, message: &BlockSummaryMessage) -> RoundResult {
        match message {
            BlockSummaryMessage::PostCondition(m) => self.on_post_condition(m),
            BlockSummaryMessage::ErrorCondition(m) => self.on_error_condition(m),
        }
    }

    /// Enter a message round. `Ok(false)` means the worker is terminated and
    /// the message is dropped.
    fn enter_round(&mut self) -> Result<bool, WorkerError> {
        if self.cancel.is_cancelled() {
            self.terminate();
        }
        match self.state {
            WorkerState::Waiting => {
                self.state = WorkerState::Analyzing;
                Ok(true)
            }
            WorkerState::Terminated => Ok(false),
            other => Err(self.protocol_violation(format!(
                "message delivered while worker is {other}"
            ))),
        }
    }

    fn leave_round(&mut self, outcome: RoundResult) -> RoundResult {
        self.rounds += 1;
        match &outcome {
            Ok(messages) => {
                if self.state != WorkerState::Terminated {
                    self.state = WorkerState::Waiting;
                }
                debug!(
                    block = %self.block.id(),
                    round = self.rounds,
                    emitted = messages.len(),
                    "round finished"
                );
            }
            Err(err) => {
                warn!(block = %self.block.id(), error = %err, "round aborted");
                self.state = WorkerState::Terminated;
            }
        }
        outcome
    }

    fn protocol_violation(&self, reason: impl Into<String>) -> WorkerError {
        WorkerError::ProtocolViolation {
            block: self.block.id().clone(),
            reason: reason.into(),
        }
    }

    fn analysis_error(&self, source: AnalysisError) -> WorkerError {
        match source {
            AnalysisError::Cancelled => WorkerError::Cancelled {
                block: self.block.id().clone(),
            },
            AnalysisError::Deserialization(source) => WorkerError::Deserialization {
                block: self.block.id().clone(),
                source,
            },
            source => WorkerError::Analysis {
                block: self.block.id().clone(),
                source,
            },
        }
    }

    fn deserialization_error(&self, source: DeserializationError) -> WorkerError {
        WorkerError::Deserialization {
            block: self.block.id().clone(),
            source,
        }
    }

    /// Clear the working set and fold in every contributing precondition.
    /// The root block always keeps the program's initial state.
    fn rebuild_working_set(&mut self) -> Result<(), WorkerError> {
        let start = self.block.start();
        let precision = self.analysis.initial_precision(start);
        self.working_set.clear();
        if self.config.is_root {
            let initial = self.analysis.initial_state(start);
            self.working_set.push(initial, precision.clone());
        }
        for state in self.preconditions.active_states() {
            self.working_set
                .fold(&self.analysis, state.clone(), precision.clone())
                .map_err(|e| self.analysis_error(e))?;
        }
        if self.working_set.is_empty() {
            let initial = self.analysis.initial_state(start);
            self.working_set.push(initial, precision);
        }
        Ok(())
    }

    /// Run the local exploration and fold its status into the worker's.
    fn explore(&mut self) -> Result<ExplorationResult<A::State, A::Precision>, WorkerError> {
        if self.working_set.is_empty() {
            return Err(self.protocol_violation("working set is empty before exploration"));
        }
        let working_set = std::mem::take(&mut self.working_set);
        let mut result = self
            .analysis
            .explore(working_set, &self.cancel)
            .map_err(|e| self.analysis_error(e))?;
        self.status = self.status.update(result.status);
        self.working_set = std::mem::take(&mut result.working_set);
        debug!(
            block = %self.block.id(),
            block_ends = result.block_ends.len(),
            violations = result.violations.len(),
            status = %result.status,
            "exploration finished"
        );
        Ok(result)
    }

    /// Join of everything that may hold at the block start.
    fn precondition_summary(&self) -> Result<A::State, WorkerError> {
        let mut states: Vec<A::State> = self.preconditions.active_states().cloned().collect();
        if self.config.is_root {
            states.push(self.analysis.initial_state(self.block.start()));
        }
        self.analysis
            .combine(&states)
            .map_err(|e| self.analysis_error(e))
    }

    fn post_condition(&self, state: &A::State, reachable: bool) -> BlockSummaryMessage {
        let full_path = !reachable || self.preconditions.forward_full_path(&self.block);
        let end = self.block.end();
        let precision = self.analysis.initial_precision(end);
        let payload = if reachable {
            self.analysis.serialize(state, &precision)
        } else {
            Payload::new()
        };
        PostConditionMessage::new(
            self.block.id().clone(),
            end,
            payload.with_status(self.status),
            reachable,
            full_path,
        )
        .into()
    }

    /// Post condition for a block whose end is unreachable from its start.
    fn unreachable_post_condition(&self) -> BlockSummaryMessage {
        let initial = self.analysis.initial_state(self.block.end());
        self.post_condition(&initial, false)
    }

    /// Check a violation and build one error condition per feasible path.
    /// `visited` lists the blocks the condition already passed, origin
    /// first; this block is appended.
    fn report_violation(
        &mut self,
        violation: &Violation<A::State>,
        first: bool,
        visited: &[BlockId],
    ) -> Result<Vec<BlockSummaryMessage>, WorkerError> {
        let mut trail = visited.to_vec();
        if trail.last() != Some(self.block.id()) {
            trail.push(self.block.id().clone());
        }

        if self.config.is_root && self.confirmed.is_none() {
            self.confirm_from_entry(violation, &trail)?;
        }

        let summary = self.precondition_summary()?;
        let extraction = CounterexampleExtractor::extract(
            &mut self.analysis,
            self.block.id(),
            violation,
            &summary,
            &self.cancel,
        )
        .map_err(|e| self.analysis_error(e))?;

        match extraction {
            Extraction::Confirmed(paths) => {
                let precision = self.analysis.initial_precision(self.block.start());
                let messages = paths
                    .iter()
                    .map(|path| {
                        let payload = self
                            .analysis
                            .serialize(&path.condition, &precision)
                            .with_status(self.status)
                            .with_visited(&trail);
                        ErrorConditionMessage::new(
                            self.block.id().clone(),
                            self.block.start(),
                            payload,
                            first,
                        )
                        .into()
                    })
                    .collect();
                Ok(messages)
            }
            Extraction::Refuted => {
                debug!(
                    block = %self.block.id(),
                    location = %violation.location,
                    "violation refuted under current preconditions"
                );
                Ok(Vec::new())
            }
            Extraction::Unconfirmed { reason } => {
                warn!(
                    block = %self.block.id(),
                    location = %violation.location,
                    reason = %reason,
                    "violation could not be confirmed; result degraded to unsound"
                );
                self.status = self.status.with_sound(false);
                Ok(Vec::new())
            }
        }
    }

    /// Root only: check the violation against the program's initial state
    /// and record a counterexample when a path exists.
    fn confirm_from_entry(
        &mut self,
        violation: &Violation<A::State>,
        trail: &[BlockId],
    ) -> Result<(), WorkerError> {
        let initial = self.analysis.initial_state(self.block.start());
        let extraction = CounterexampleExtractor::extract(
            &mut self.analysis,
            self.block.id(),
            violation,
            &initial,
            &self.cancel,
        )
        .map_err(|e| self.analysis_error(e))?;
        if let Extraction::Confirmed(paths) = extraction {
            if let Some(path) = paths.into_iter().next() {
                let blocks = trail.iter().rev().cloned().collect();
                warn!(
                    block = %self.block.id(),
                    location = %violation.location,
                    "violation confirmed from the program entry"
                );
                self.confirmed = Some(Counterexample {
                    blocks,
                    entry_target: violation.location,
                    entry_fragment: path.fragment,
                });
            }
        }
        Ok(())
    }

    /// Report violations at error locations, suppressing locations already
    /// reported unless the block takes part in a loop.
    fn report_error_locations(
        &mut self,
        violations: &[Violation<A::State>],
        out: &mut Vec<BlockSummaryMessage>,
    ) -> Result<(), WorkerError> {
        let origin = [self.block.id().clone()];
        for violation in violations
            .iter()
            .filter(|v| v.kind == ViolationKind::ErrorLocation)
        {
            if self.reported_violations.contains(&violation.location) && !self.config.on_cycle {
                debug!(
                    block = %self.block.id(),
                    location = %violation.location,
                    "violation already reported"
                );
                continue;
            }
            self.reported_violations.insert(violation.location);
            out.extend(self.report_violation(violation, true, &origin)?);
        }
        Ok(())
    }

    /// Check violation conditions that were never forwarded against the
    /// current preconditions.
    fn recheck_violation_conditions(
        &mut self,
        out: &mut Vec<BlockSummaryMessage>,
    ) -> Result<(), WorkerError> {
        let pending: Vec<(BlockId, usize, A::State, Vec<BlockId>)> = self
            .violation_conditions
            .unforwarded()
            .map(|(id, index, record)| {
                (
                    id.clone(),
                    index,
                    record.condition().clone(),
                    record.trail().to_vec(),
                )
            })
            .collect();
        for (successor, index, condition, trail) in pending {
            let violation = Violation {
                kind: ViolationKind::ViolationCondition,
                location: self.block.end(),
                state: condition,
            };
            let messages = self.report_violation(&violation, false, &trail)?;
            if !messages.is_empty() {
                self.violation_conditions.mark_forwarded(&successor, index);
                out.extend(messages);
            }
        }
        Ok(())
    }
}

impl<A: LocalAnalysis> fmt::Debug for BlockWorker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockWorker")
            .field("block", self.block.id())
            .field("state", &self.state)
            .field("rounds", &self.rounds)
            .field("status", &self.status)
            .field("working_set", &self.working_set.len())
            .finish()
    }
}
