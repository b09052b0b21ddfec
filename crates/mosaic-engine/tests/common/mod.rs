#![allow(dead_code)]

use std::collections::BTreeSet;

use proptest::prelude::*;

use mosaic_engine::domains::interval::{Interval, IntervalOptions, IntervalState};
use mosaic_engine::result::VerificationReport;
use mosaic_engine::scheduler::EngineOptions;
use mosaic_ir::{BlockBody, BlockId, CfaEdge, Cmp, Location, Operation, ProgramModel, Term};

pub fn assign(var: &str, value: i64) -> Operation {
    Operation::Assign {
        var: var.into(),
        value: Term::Const(value),
    }
}

pub fn increment(var: &str, by: i64) -> Operation {
    Operation::Assign {
        var: var.into(),
        value: Term::Var {
            name: var.into(),
            offset: by,
        },
    }
}

pub fn assume(var: &str, cmp: Cmp, value: i64) -> Operation {
    Operation::Assume {
        var: var.into(),
        cmp,
        value,
    }
}

pub fn block(id: &str, start: u32, end: u32, edges: Vec<(u32, u32, Operation)>) -> BlockBody {
    BlockBody {
        id: BlockId::new(id),
        start: Location::new(start),
        end: Location::new(end),
        edges: edges
            .into_iter()
            .map(|(from, to, op)| CfaEdge::new(from, to, op))
            .collect(),
    }
}

pub fn model(name: &str, errors: &[u32], blocks: Vec<BlockBody>) -> ProgramModel {
    ProgramModel {
        name: Some(name.into()),
        entry: Location::new(0),
        error_locations: errors.iter().copied().map(Location::new).collect::<BTreeSet<_>>(),
        blocks,
    }
}

/// `init` assigns `x`, `check` fails at location 9 when x > 3.
pub fn guarded_model(initial: i64) -> ProgramModel {
    model(
        "guarded",
        &[9],
        vec![
            block("init", 0, 1, vec![(0, 1, assign("x", initial))]),
            block(
                "check",
                1,
                2,
                vec![
                    (1, 2, assume("x", Cmp::Le, 3)),
                    (1, 9, assume("x", Cmp::Gt, 3)),
                ],
            ),
        ],
    )
}

/// Counting loop `i = 0; while i < 10 { i += 1 }` with an exit check that
/// fails when i > 10.
pub fn counting_loop_model() -> ProgramModel {
    model(
        "counting-loop",
        &[9],
        vec![
            block("init", 0, 1, vec![(0, 1, assign("i", 0))]),
            block("head", 1, 2, vec![(1, 2, assume("i", Cmp::Lt, 10))]),
            block("body", 2, 1, vec![(2, 1, increment("i", 1))]),
            block(
                "exit",
                1,
                5,
                vec![
                    (1, 4, assume("i", Cmp::Ge, 10)),
                    (4, 5, assume("i", Cmp::Le, 10)),
                    (4, 9, assume("i", Cmp::Gt, 10)),
                ],
            ),
        ],
    )
}

pub fn engine_options() -> EngineOptions {
    EngineOptions {
        timeout_secs: 30,
        ..EngineOptions::default()
    }
}

pub async fn verify(model: ProgramModel) -> VerificationReport {
    mosaic_engine::verify_model(model, engine_options(), IntervalOptions::default())
        .await
        .unwrap_or_else(|e| panic!("verification failed: {e}"))
}

pub fn arb_interval() -> impl Strategy<Value = Interval> {
    (
        proptest::option::of(-20i64..20),
        proptest::option::of(0i64..20),
    )
        .prop_map(|(lo, width)| match (lo, width) {
            (Some(lo), Some(width)) => Interval::new(Some(lo), Some(lo + width)),
            (lo, None) => Interval::new(lo, None),
            (None, Some(hi)) => Interval::new(None, Some(hi)),
        })
}

pub fn arb_interval_state() -> impl Strategy<Value = IntervalState> {
    proptest::collection::vec(
        (prop::sample::select(vec!["x", "y", "z"]), arb_interval()),
        0..4,
    )
    .prop_map(|constraints| IntervalState::from_constraints(constraints))
}
