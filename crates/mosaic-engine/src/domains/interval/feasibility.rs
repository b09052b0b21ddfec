//! Backward path search with exact interval weakest preconditions.
//!
//! Each path from the block start to the violation is explored backwards.
//! The precondition of a path is a conjunction of intervals and every
//! supported operation has an exact weakest precondition over such
//! conjunctions, so a non-bottom precondition means the path is feasible.

use tokio_util::sync::CancellationToken;

use mosaic_ir::{Location, Operation, Term};

use super::state::{Interval, IntervalState};
use super::IntervalAnalysis;
use crate::analysis::{AnalysisError, FeasiblePath, Feasibility, Violation, ViolationKind};

/// Weakest precondition of `op` with respect to `post`.
pub(super) fn weakest_precondition(post: &IntervalState, op: &Operation) -> IntervalState {
    if post.is_bottom() {
        return IntervalState::bottom();
    }
    let mut pre = post.without_condition();
    match op {
        Operation::Assign {
            var,
            value: Term::Const(c),
        } => {
            if !post.get(var).contains_value(*c) {
                return IntervalState::bottom();
            }
            pre.forget(var);
        }
        Operation::Assign {
            var,
            value: Term::Var { name, offset },
        } => {
            let required = post.get(var).unshift(*offset);
            pre.forget(var);
            pre.constrain(name, required);
        }
        Operation::Assume { var, cmp, value } => {
            pre.constrain(var, Interval::from_comparison(*cmp, *value));
        }
        Operation::Havoc { var } => pre.forget(var),
        Operation::Skip => {}
    }
    pre
}

struct Frame {
    location: Location,
    condition: IntervalState,
    /// Edge indices, violation side first.
    edges: Vec<usize>,
}

impl IntervalAnalysis {
    pub(super) fn search_paths(
        &self,
        violation: &Violation<IntervalState>,
        preconditions: &IntervalState,
        cancel: &CancellationToken,
    ) -> Result<Feasibility<IntervalState>, AnalysisError> {
        let start = self.body.start;
        let target = match violation.kind {
            ViolationKind::ErrorLocation => IntervalState::top(),
            ViolationKind::ViolationCondition => violation.state.without_condition(),
        };
        let preconditions = preconditions.without_condition();

        let mut found: Vec<FeasiblePath<IntervalState>> = Vec::new();
        let mut truncated = false;
        let mut expansions = 0usize;
        let mut stack = vec![Frame {
            location: violation.location,
            condition: target,
            edges: Vec::new(),
        }];

        while let Some(frame) = stack.pop() {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            expansions += 1;
            if expansions > self.options.max_exploration_steps {
                return Ok(Feasibility::Unknown {
                    reason: format!(
                        "path search in block '{}' exceeded {} expansions",
                        self.body.id, self.options.max_exploration_steps
                    ),
                });
            }

            if frame.location == start
                && !frame.condition.meet(&preconditions).is_bottom()
                && !found.iter().any(|p| p.condition == frame.condition)
            {
                found.push(FeasiblePath {
                    steps: self.render_path(&frame.edges),
                    condition: frame.condition.clone(),
                });
            }

            let incoming = self.incoming(frame.location);
            if frame.edges.len() >= self.options.max_path_length {
                truncated |= !incoming.is_empty();
                continue;
            }
            for &index in incoming {
                let edge = &self.body.edges[index];
                if self.error_locations.contains(&edge.from) {
                    continue;
                }
                let before = weakest_precondition(&frame.condition, &edge.op);
                if before.is_bottom() {
                    continue;
                }
                let mut edges = frame.edges.clone();
                edges.push(index);
                stack.push(Frame {
                    location: edge.from,
                    condition: before,
                    edges,
                });
            }
        }

        if truncated {
            return Ok(Feasibility::Unknown {
                reason: format!(
                    "paths in block '{}' longer than {} edges were not checked",
                    self.body.id, self.options.max_path_length
                ),
            });
        }
        if found.is_empty() {
            Ok(Feasibility::Infeasible)
        } else {
            Ok(Feasibility::Feasible(found))
        }
    }

    fn render_path(&self, edges: &[usize]) -> Vec<String> {
        edges
            .iter()
            .rev()
            .map(|&i| self.body.edges[i].to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_ir::Cmp;

    fn x_at_least(c: i64) -> IntervalState {
        IntervalState::from_constraints([("x", Interval::at_least(c))])
    }

    #[test]
    fn constant_assignment_decides_the_target() {
        let op = Operation::Assign {
            var: "x".into(),
            value: Term::Const(5),
        };
        assert!(weakest_precondition(&x_at_least(3), &op).is_top());
        assert!(weakest_precondition(&x_at_least(6), &op).is_bottom());
    }

    #[test]
    fn increment_moves_the_bound_back() {
        let op = Operation::Assign {
            var: "x".into(),
            value: Term::Var {
                name: "x".into(),
                offset: 1,
            },
        };
        assert_eq!(weakest_precondition(&x_at_least(10), &op), x_at_least(9));
    }

    #[test]
    fn target_beyond_the_integer_range_has_no_precondition() {
        let op = Operation::Assign {
            var: "x".into(),
            value: Term::Var {
                name: "y".into(),
                offset: 5,
            },
        };
        let post = IntervalState::from_constraints([("x", Interval::at_most(i64::MIN + 1))]);
        assert!(weakest_precondition(&post, &op).is_bottom());
    }

    #[test]
    fn copy_constrains_the_source() {
        let post = IntervalState::from_constraints([
            ("y", Interval::at_most(4)),
            ("x", Interval::at_least(0)),
        ]);
        let op = Operation::Assign {
            var: "y".into(),
            value: Term::Var {
                name: "x".into(),
                offset: 0,
            },
        };
        let pre = weakest_precondition(&post, &op);
        assert_eq!(pre.get("x"), Interval::new(Some(0), Some(4)));
        assert!(pre.get("y").is_top());
    }

    #[test]
    fn assumption_is_conjoined() {
        let op = Operation::Assume {
            var: "x".into(),
            cmp: Cmp::Lt,
            value: 2,
        };
        assert!(weakest_precondition(&x_at_least(2), &op).is_bottom());
    }
}
