//! Contract between the block-summary protocol and a local abstract domain.
//!
//! The protocol never looks inside abstract states. Everything it needs
//! (seeding, serialization, join, coverage, exploration, feasibility) goes
//! through [`LocalAnalysis`]. One analysis instance is created per block by an
//! [`AnalysisFactory`] and is owned by that block's worker.

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use mosaic_ir::{AlgorithmStatus, Block, BlockGraph, ConfigurationError, DeserializationError, Location, Payload};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("analysis cancelled")]
    Cancelled,
    #[error("exploration budget exhausted: {0}")]
    BudgetExhausted(String),
    #[error("domain failure: {0}")]
    Domain(String),
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
}

/// One path through a block that reaches a violation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeasiblePath<S> {
    /// Rendered edges, block start first.
    pub steps: Vec<String>,
    /// States at the block start from which this path reaches the violation.
    pub condition: S,
}

/// Outcome of checking whether a violation is reachable along a real path.
#[derive(Debug, Clone, PartialEq)]
pub enum Feasibility<S> {
    /// At least one path exists. Every feasible path is listed; paths with
    /// the same condition are listed once.
    Feasible(Vec<FeasiblePath<S>>),
    /// No path through the block reaches the violation.
    Infeasible,
    /// The check gave up; the violation is neither confirmed nor refuted.
    Unknown { reason: String },
}

/// Where a violation was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViolationKind {
    /// A specification error location inside the block was reached.
    ErrorLocation,
    /// A block-end state intersects an attached violation condition.
    ViolationCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation<S> {
    pub kind: ViolationKind,
    pub location: Location,
    pub state: S,
}

/// One member of a worker's working set.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSetEntry<S, P> {
    pub state: S,
    pub precision: P,
}

/// States under active exploration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingSet<S, P> {
    entries: Vec<WorkingSetEntry<S, P>>,
}

impl<S, P> Default for WorkingSet<S, P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S, P> WorkingSet<S, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(state: S, precision: P) -> Self {
        Self {
            entries: vec![WorkingSetEntry { state, precision }],
        }
    }

    pub fn push(&mut self, state: S, precision: P) {
        self.entries.push(WorkingSetEntry { state, precision });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkingSetEntry<S, P>> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkingSetEntry<S, P>> {
        self.entries.iter_mut()
    }

    pub fn states(&self) -> impl Iterator<Item = &S> {
        self.entries.iter().map(|e| &e.state)
    }

    /// Fold a state in with the domain's merge/stop discipline: merge it into
    /// every member, then add it unless some member already covers it.
    pub fn fold<A>(&mut self, analysis: &A, state: S, precision: P) -> Result<(), AnalysisError>
    where
        A: LocalAnalysis<State = S, Precision = P> + ?Sized,
    {
        for entry in &mut self.entries {
            entry.state = analysis.merge(&state, &entry.state)?;
        }
        for entry in &self.entries {
            if analysis.is_covered(&state, &entry.state)? {
                return Ok(());
            }
        }
        self.push(state, precision);
        Ok(())
    }
}

impl<S, P> IntoIterator for WorkingSet<S, P> {
    type Item = WorkingSetEntry<S, P>;
    type IntoIter = std::vec::IntoIter<WorkingSetEntry<S, P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Result of one bounded local fixpoint exploration.
#[derive(Debug, Clone)]
pub struct ExplorationResult<S, P> {
    /// States left for a later exploration (empty when the fixpoint completed).
    pub working_set: WorkingSet<S, P>,
    /// States reaching the block end.
    pub block_ends: Vec<S>,
    /// States reaching a violation.
    pub violations: Vec<Violation<S>>,
    pub status: AlgorithmStatus,
}

/// Capability set a local abstract domain provides to a block worker.
///
/// Implementations must keep [`combine`](LocalAnalysis::combine)
/// order-insensitive: messages from different senders arrive in any order.
pub trait LocalAnalysis: Send + 'static {
    type State: Clone + fmt::Debug + Send + 'static;
    type Precision: Clone + fmt::Debug + Send + 'static;

    fn initial_state(&self, location: Location) -> Self::State;

    fn initial_precision(&self, location: Location) -> Self::Precision;

    /// Domain payload entries for a state; must not use reserved keys.
    fn serialize(&self, state: &Self::State, precision: &Self::Precision) -> Payload;

    fn deserialize(&self, payload: &Payload) -> Result<Self::State, DeserializationError>;

    /// Join of all states; the empty join is the initial state at the block start.
    fn combine(&self, states: &[Self::State]) -> Result<Self::State, AnalysisError>;

    /// True iff `new` is subsumed by `previous`.
    fn is_covered(&self, new: &Self::State, previous: &Self::State) -> Result<bool, AnalysisError>;

    /// True for the state that carries no information.
    fn is_top(&self, state: &Self::State) -> bool;

    /// Merge `new` into `existing`, returning the replacement for `existing`.
    /// Domains that keep states separate return `existing` unchanged.
    fn merge(&self, new: &Self::State, existing: &Self::State) -> Result<Self::State, AnalysisError>;

    /// Attach a backward-propagated violation condition to a state so the
    /// next exploration reports block-end states that satisfy it.
    fn attach_violation_condition(&self, state: &mut Self::State, condition: &Self::State);

    /// Run the local fixpoint over the block. Must poll `cancel` after every
    /// expansion step and return [`AnalysisError::Cancelled`] once it fires.
    fn explore(
        &mut self,
        working_set: WorkingSet<Self::State, Self::Precision>,
        cancel: &CancellationToken,
    ) -> Result<ExplorationResult<Self::State, Self::Precision>, AnalysisError>;

    /// Decide whether `violation` is reachable from `preconditions` at the
    /// block start. Only used by the counterexample extractor.
    fn check_feasibility(
        &mut self,
        violation: &Violation<Self::State>,
        preconditions: &Self::State,
        cancel: &CancellationToken,
    ) -> Result<Feasibility<Self::State>, AnalysisError>;
}

/// Creates the local analysis of each block.
pub trait AnalysisFactory {
    type Analysis: LocalAnalysis;

    fn create(&self, block: &Block, graph: &BlockGraph) -> Result<Self::Analysis, ConfigurationError>;
}
