//! Worklist exploration of one block.

use std::collections::{BTreeMap, VecDeque};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use mosaic_ir::{AlgorithmStatus, Location, Operation, Term};

use super::state::{Interval, IntervalState};
use super::IntervalAnalysis;
use crate::analysis::{AnalysisError, ExplorationResult, Violation, ViolationKind, WorkingSet};

/// Strongest postcondition of `op`.
pub(super) fn transfer(state: &IntervalState, op: &Operation) -> IntervalState {
    if state.is_bottom() {
        return state.clone();
    }
    let mut next = state.clone();
    match op {
        Operation::Assign { var, value } => {
            let interval = match value {
                Term::Const(c) => Interval::constant(*c),
                Term::Var { name, offset } => state.get(name).shift(*offset),
            };
            next.set(var, interval);
        }
        Operation::Assume { var, cmp, value } => {
            next.constrain(var, Interval::from_comparison(*cmp, *value));
        }
        Operation::Havoc { var } => next.forget(var),
        Operation::Skip => {}
    }
    next
}

impl IntervalAnalysis {
    pub(super) fn run_worklist(
        &self,
        working_set: WorkingSet<IntervalState, ()>,
        cancel: &CancellationToken,
    ) -> Result<ExplorationResult<IntervalState, ()>, AnalysisError> {
        let start = self.body.start;
        let end = self.body.end;

        let mut reached: BTreeMap<Location, IntervalState> = BTreeMap::new();
        let mut seed = IntervalState::bottom();
        for entry in working_set {
            seed = seed.join(&entry.state);
        }
        if seed.is_bottom() {
            return Ok(ExplorationResult {
                working_set: WorkingSet::new(),
                block_ends: Vec::new(),
                violations: Vec::new(),
                status: AlgorithmStatus::SOUND_AND_PRECISE,
            });
        }
        reached.insert(start, seed);

        let mut visits: BTreeMap<Location, usize> = BTreeMap::new();
        let mut worklist = VecDeque::from([start]);
        let mut steps = 0usize;

        while let Some(location) = worklist.pop_front() {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            steps += 1;
            if steps > self.options.max_exploration_steps {
                return Err(AnalysisError::BudgetExhausted(format!(
                    "block '{}' needed more than {} exploration steps",
                    self.body.id, self.options.max_exploration_steps
                )));
            }
            if self.error_locations.contains(&location) {
                continue;
            }
            if location == end && start != end {
                continue;
            }
            let Some(current) = reached.get(&location).cloned() else {
                continue;
            };
            for edge in self.outgoing(location) {
                let successor = transfer(&current, &edge.op);
                if successor.is_bottom() {
                    continue;
                }
                let updated = match reached.get(&edge.to) {
                    None => successor,
                    Some(previous) if successor.is_covered_by(previous) => continue,
                    Some(previous) => {
                        let count = visits.entry(edge.to).or_default();
                        *count += 1;
                        let joined = previous.join(&successor);
                        if *count > self.options.widening_threshold {
                            trace!(location = %edge.to, "widening");
                            previous.widen(&joined)
                        } else {
                            joined
                        }
                    }
                };
                reached.insert(edge.to, updated);
                if !worklist.contains(&edge.to) {
                    worklist.push_back(edge.to);
                }
            }
        }

        let mut block_ends = Vec::new();
        let mut violations = Vec::new();
        for (location, state) in &reached {
            if self.error_locations.contains(location) {
                violations.push(Violation {
                    kind: ViolationKind::ErrorLocation,
                    location: *location,
                    state: state.without_condition(),
                });
            }
        }
        if let Some(state) = reached.get(&end) {
            if let Some(condition) = state.condition() {
                if !state.without_condition().meet(condition).is_bottom() {
                    violations.push(Violation {
                        kind: ViolationKind::ViolationCondition,
                        location: end,
                        state: condition.clone(),
                    });
                }
            }
            block_ends.push(state.without_condition());
        }

        Ok(ExplorationResult {
            working_set: WorkingSet::new(),
            block_ends,
            violations,
            status: AlgorithmStatus::SOUND_AND_PRECISE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_ir::Cmp;

    #[test]
    fn assignment_with_offset_shifts_the_source() {
        let s = IntervalState::from_constraints([("x", Interval::new(Some(0), Some(3)))]);
        let op = Operation::Assign {
            var: "y".into(),
            value: Term::Var {
                name: "x".into(),
                offset: 2,
            },
        };
        assert_eq!(transfer(&s, &op).get("y"), Interval::new(Some(2), Some(5)));
    }

    #[test]
    fn contradicting_assumption_is_bottom() {
        let s = IntervalState::from_constraints([("x", Interval::constant(0))]);
        let op = Operation::Assume {
            var: "x".into(),
            cmp: Cmp::Gt,
            value: 0,
        };
        assert!(transfer(&s, &op).is_bottom());
    }
}
