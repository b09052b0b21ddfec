//! Interval domain over the block language of [`mosaic_ir::program`].
//!
//! States are conjunctions of per-variable intervals. Exploration is a
//! worklist fixpoint with widening; feasibility is decided by a bounded
//! backward path search with exact weakest preconditions.

mod explore;
mod feasibility;
pub mod state;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use mosaic_ir::{
    Block, BlockBody, BlockGraph, CfaEdge, ConfigurationError, DeserializationError, Location,
    Payload, ProgramModel,
};

use crate::analysis::{
    AnalysisError, AnalysisFactory, ExplorationResult, Feasibility, LocalAnalysis, Violation,
    WorkingSet,
};

pub use state::{Interval, IntervalState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalOptions {
    /// Joins at one location before widening kicks in.
    pub widening_threshold: usize,
    /// Worklist steps per exploration and expansions per path search.
    pub max_exploration_steps: usize,
    /// Longest path (in edges) the feasibility search follows.
    pub max_path_length: usize,
}

impl Default for IntervalOptions {
    fn default() -> Self {
        Self {
            widening_threshold: 3,
            max_exploration_steps: 10_000,
            max_path_length: 64,
        }
    }
}

/// Interval analysis of one block.
#[derive(Debug, Clone)]
pub struct IntervalAnalysis {
    body: BlockBody,
    error_locations: BTreeSet<Location>,
    options: IntervalOptions,
    outgoing: BTreeMap<Location, Vec<usize>>,
    incoming: BTreeMap<Location, Vec<usize>>,
}

impl IntervalAnalysis {
    /// `error_locations` may list locations outside the block; they are
    /// filtered.
    pub fn new(
        body: BlockBody,
        error_locations: &BTreeSet<Location>,
        options: IntervalOptions,
    ) -> Self {
        let mut outgoing: BTreeMap<Location, Vec<usize>> = BTreeMap::new();
        let mut incoming: BTreeMap<Location, Vec<usize>> = BTreeMap::new();
        for (index, edge) in body.edges.iter().enumerate() {
            outgoing.entry(edge.from).or_default().push(index);
            incoming.entry(edge.to).or_default().push(index);
        }
        let locations = body.locations();
        let error_locations = error_locations
            .iter()
            .filter(|l| locations.contains(l))
            .copied()
            .collect();
        Self {
            body,
            error_locations,
            options,
            outgoing,
            incoming,
        }
    }

    pub fn body(&self) -> &BlockBody {
        &self.body
    }

    pub fn options(&self) -> IntervalOptions {
        self.options
    }

    fn outgoing(&self, location: Location) -> impl Iterator<Item = &CfaEdge> {
        self.outgoing
            .get(&location)
            .into_iter()
            .flatten()
            .map(|&i| &self.body.edges[i])
    }

    fn incoming(&self, location: Location) -> &[usize] {
        self.incoming
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl LocalAnalysis for IntervalAnalysis {
    type State = IntervalState;
    type Precision = ();

    fn initial_state(&self, _location: Location) -> IntervalState {
        IntervalState::top()
    }

    fn initial_precision(&self, _location: Location) {}

    fn serialize(&self, state: &IntervalState, _precision: &()) -> Payload {
        state.to_payload()
    }

    fn deserialize(&self, payload: &Payload) -> Result<IntervalState, DeserializationError> {
        IntervalState::from_payload(payload)
    }

    fn combine(&self, states: &[IntervalState]) -> Result<IntervalState, AnalysisError> {
        let Some((first, rest)) = states.split_first() else {
            return Ok(self.initial_state(self.body.start));
        };
        let joined = rest
            .iter()
            .fold(first.without_condition(), |acc, s| acc.join(&s.without_condition()));
        Ok(joined)
    }

    fn is_covered(&self, new: &IntervalState, previous: &IntervalState) -> Result<bool, AnalysisError> {
        Ok(new.is_covered_by(previous))
    }

    fn is_top(&self, state: &IntervalState) -> bool {
        state.is_top()
    }

    fn merge(&self, new: &IntervalState, existing: &IntervalState) -> Result<IntervalState, AnalysisError> {
        Ok(existing.join(new))
    }

    fn attach_violation_condition(&self, state: &mut IntervalState, condition: &IntervalState) {
        state.set_condition(condition.clone());
    }

    fn explore(
        &mut self,
        working_set: WorkingSet<IntervalState, ()>,
        cancel: &CancellationToken,
    ) -> Result<ExplorationResult<IntervalState, ()>, AnalysisError> {
        self.run_worklist(working_set, cancel)
    }

    fn check_feasibility(
        &mut self,
        violation: &Violation<IntervalState>,
        preconditions: &IntervalState,
        cancel: &CancellationToken,
    ) -> Result<Feasibility<IntervalState>, AnalysisError> {
        self.search_paths(violation, preconditions, cancel)
    }
}

/// Builds one [`IntervalAnalysis`] per block of a program model.
#[derive(Debug, Clone)]
pub struct IntervalFactory {
    model: Arc<ProgramModel>,
    options: IntervalOptions,
}

impl IntervalFactory {
    pub fn new(model: Arc<ProgramModel>, options: IntervalOptions) -> Self {
        Self { model, options }
    }
}

impl AnalysisFactory for IntervalFactory {
    type Analysis = IntervalAnalysis;

    fn create(&self, block: &Block, _graph: &BlockGraph) -> Result<IntervalAnalysis, ConfigurationError> {
        let body = self
            .model
            .body(block.id())
            .ok_or_else(|| ConfigurationError::MissingAnalysis(block.id().clone()))?;
        Ok(IntervalAnalysis::new(
            body.clone(),
            &self.model.error_locations,
            self.options,
        ))
    }
}
