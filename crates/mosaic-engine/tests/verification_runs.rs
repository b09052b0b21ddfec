//! End-to-end runs of the block-summary scheduler on small program models.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use mosaic_engine::analysis::{
    AnalysisError, AnalysisFactory, ExplorationResult, Feasibility, LocalAnalysis, Violation,
    WorkingSet,
};
use mosaic_engine::domains::interval::{
    IntervalAnalysis, IntervalFactory, IntervalOptions, IntervalState,
};
use mosaic_engine::result::VerificationResult;
use mosaic_engine::scheduler::{EngineOptions, Scheduler};
use mosaic_ir::{
    Block, BlockGraph, BlockId, Cmp, ConfigurationError, DeserializationError, Location, Payload,
    ProgramModel,
};

use common::*;

fn scheduler_for(model: ProgramModel, options: EngineOptions) -> Scheduler<IntervalFactory> {
    let graph = model.block_graph().unwrap();
    let factory = IntervalFactory::new(Arc::new(model), IntervalOptions::default());
    Scheduler::new(graph, factory, options)
}

#[tokio::test]
async fn guarded_model_is_safe_when_the_guard_holds() {
    let report = verify(guarded_model(0)).await;
    assert!(report.result.is_safe(), "unexpected result: {}", report.result);
    assert!(report.status.sound);
    assert_eq!(report.blocks, 2);
    assert_eq!(report.statistics.lost_messages, 0);
    assert!(report.statistics.rounds_per_block.values().all(|&r| r >= 1));
}

#[tokio::test]
async fn guarded_model_is_unsafe_when_the_guard_fails() {
    let report = verify(guarded_model(5)).await;
    let VerificationResult::Unsafe { counterexample } = &report.result else {
        panic!("expected UNSAFE, got {}", report.result);
    };
    assert_eq!(
        counterexample.blocks,
        vec![BlockId::new("init"), BlockId::new("check")]
    );
    assert_eq!(counterexample.entry_fragment.block, BlockId::new("init"));
    assert_eq!(counterexample.entry_target, Location::new(1));
    assert_eq!(counterexample.entry_fragment.steps.len(), 1);
}

#[tokio::test]
async fn violation_is_traced_through_an_intermediate_block() {
    let program = model(
        "chain",
        &[9],
        vec![
            block("init", 0, 1, vec![(0, 1, assign("x", 0))]),
            block("bump", 1, 2, vec![(1, 2, increment("x", 5))]),
            block(
                "check",
                2,
                3,
                vec![
                    (2, 3, assume("x", Cmp::Le, 3)),
                    (2, 9, assume("x", Cmp::Gt, 3)),
                ],
            ),
        ],
    );
    let report = verify(program).await;
    let VerificationResult::Unsafe { counterexample } = &report.result else {
        panic!("expected UNSAFE, got {}", report.result);
    };
    let chain: Vec<&str> = counterexample.blocks.iter().map(BlockId::as_str).collect();
    assert_eq!(chain, ["init", "bump", "check"]);
}

#[tokio::test]
async fn bounded_counting_loop_is_safe() {
    let report = verify(counting_loop_model()).await;
    assert!(report.result.is_safe(), "unexpected result: {}", report.result);
    assert!(report.statistics.rounds_per_block[&BlockId::new("head")] > 1);
}

#[tokio::test]
async fn loop_violation_is_found_by_unrolling_backwards() {
    let mut program = counting_loop_model();
    let exit = program
        .blocks
        .iter_mut()
        .find(|b| b.id.as_str() == "exit")
        .unwrap();
    exit.edges = vec![
        mosaic_ir::CfaEdge::new(1, 4, assume("i", Cmp::Ge, 10)),
        mosaic_ir::CfaEdge::new(4, 5, assume("i", Cmp::Gt, 10)),
        mosaic_ir::CfaEdge::new(4, 9, assume("i", Cmp::Eq, 10)),
    ];
    let report = verify(program).await;
    let VerificationResult::Unsafe { counterexample } = &report.result else {
        panic!("expected UNSAFE, got {}", report.result);
    };
    assert_eq!(counterexample.blocks.first(), Some(&BlockId::new("init")));
    assert_eq!(counterexample.blocks.last(), Some(&BlockId::new("exit")));
    let body_hops = counterexample
        .blocks
        .iter()
        .filter(|b| b.as_str() == "body")
        .count();
    assert_eq!(body_hops, 10);
}

#[tokio::test]
async fn single_block_program_without_errors_is_safe() {
    let program = model(
        "single",
        &[],
        vec![block("main", 0, 1, vec![(0, 1, assign("x", 1))])],
    );
    let report = verify(program).await;
    assert!(report.result.is_safe());
    assert_eq!(report.statistics.total_rounds(), 1);
}

#[tokio::test]
async fn round_budget_ends_the_run_as_unknown() {
    let options = EngineOptions {
        worker_round_budget: 1,
        ..engine_options()
    };
    let report = scheduler_for(guarded_model(0), options).run().await.unwrap();
    let VerificationResult::Unknown { reason } = &report.result else {
        panic!("expected UNKNOWN, got {}", report.result);
    };
    assert!(reason.contains("budget of 1 rounds"), "reason: {reason}");
}

#[tokio::test]
async fn external_cancellation_ends_the_run_as_unknown() {
    let scheduler = scheduler_for(guarded_model(0), engine_options());
    scheduler.cancellation_token().cancel();
    let report = scheduler.run().await.unwrap();
    assert_eq!(report.result.verdict_class(), "unknown");
}

#[tokio::test]
async fn report_serializes_to_json() {
    let report = verify(guarded_model(5)).await;
    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty()).unwrap();
    assert_eq!(json["program"], "guarded");
    assert_eq!(json["result"]["verdict"], "unsafe");
    assert_eq!(json["result"]["counterexample"]["blocks"][0], "init");
}

#[tokio::test]
async fn model_without_entry_block_is_a_configuration_error() {
    let mut program = guarded_model(0);
    program.entry = Location::new(7);
    let err = mosaic_engine::verify_model(program, engine_options(), IntervalOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, mosaic_engine::EngineError::Configuration(_)));
}

/// How a [`FaultyAnalysis`] deviates from the interval analysis it wraps.
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Every exploration fails.
    Explore,
    /// Every feasibility check fails.
    Feasibility,
    /// Every exploration stalls until cancelled.
    Stall,
}

struct FaultyAnalysis {
    inner: IntervalAnalysis,
    fault: Fault,
}

impl LocalAnalysis for FaultyAnalysis {
    type State = IntervalState;
    type Precision = ();

    fn initial_state(&self, location: Location) -> IntervalState {
        self.inner.initial_state(location)
    }

    fn initial_precision(&self, _location: Location) {}

    fn serialize(&self, state: &IntervalState, precision: &()) -> Payload {
        self.inner.serialize(state, precision)
    }

    fn deserialize(&self, payload: &Payload) -> Result<IntervalState, DeserializationError> {
        self.inner.deserialize(payload)
    }

    fn combine(&self, states: &[IntervalState]) -> Result<IntervalState, AnalysisError> {
        self.inner.combine(states)
    }

    fn is_covered(&self, new: &IntervalState, previous: &IntervalState) -> Result<bool, AnalysisError> {
        self.inner.is_covered(new, previous)
    }

    fn is_top(&self, state: &IntervalState) -> bool {
        self.inner.is_top(state)
    }

    fn merge(&self, new: &IntervalState, existing: &IntervalState) -> Result<IntervalState, AnalysisError> {
        self.inner.merge(new, existing)
    }

    fn attach_violation_condition(&self, state: &mut IntervalState, condition: &IntervalState) {
        self.inner.attach_violation_condition(state, condition)
    }

    fn explore(
        &mut self,
        working_set: WorkingSet<IntervalState, ()>,
        cancel: &CancellationToken,
    ) -> Result<ExplorationResult<IntervalState, ()>, AnalysisError> {
        match self.fault {
            Fault::Explore => Err(AnalysisError::Domain("transfer relation unavailable".into())),
            Fault::Stall => {
                let started = Instant::now();
                while started.elapsed() < Duration::from_secs(10) {
                    if cancel.is_cancelled() {
                        return Err(AnalysisError::Cancelled);
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                self.inner.explore(working_set, cancel)
            }
            Fault::Feasibility => self.inner.explore(working_set, cancel),
        }
    }

    fn check_feasibility(
        &mut self,
        violation: &Violation<IntervalState>,
        preconditions: &IntervalState,
        cancel: &CancellationToken,
    ) -> Result<Feasibility<IntervalState>, AnalysisError> {
        match self.fault {
            Fault::Feasibility => Err(AnalysisError::Domain("solver unavailable".into())),
            Fault::Explore | Fault::Stall => {
                self.inner.check_feasibility(violation, preconditions, cancel)
            }
        }
    }
}

struct FaultyFactory {
    inner: IntervalFactory,
    fault: Fault,
}

impl AnalysisFactory for FaultyFactory {
    type Analysis = FaultyAnalysis;

    fn create(&self, block: &Block, graph: &BlockGraph) -> Result<FaultyAnalysis, ConfigurationError> {
        let inner = self.inner.create(block, graph)?;
        Ok(FaultyAnalysis {
            inner,
            fault: self.fault,
        })
    }
}

fn faulty_scheduler(
    program: ProgramModel,
    fault: Fault,
    options: EngineOptions,
) -> Scheduler<FaultyFactory> {
    let graph = program.block_graph().unwrap();
    let factory = FaultyFactory {
        inner: IntervalFactory::new(Arc::new(program), IntervalOptions::default()),
        fault,
    };
    Scheduler::new(graph, factory, options)
}

#[tokio::test]
async fn analysis_failure_ends_the_run_as_unknown() {
    let report = faulty_scheduler(guarded_model(0), Fault::Explore, engine_options())
        .run()
        .await
        .unwrap();
    let VerificationResult::Unknown { reason } = &report.result else {
        panic!("expected UNKNOWN, got {}", report.result);
    };
    assert!(reason.contains("transfer relation unavailable"), "reason: {reason}");
}

#[tokio::test]
async fn failed_feasibility_check_leaves_the_violation_unconfirmed() {
    let report = faulty_scheduler(guarded_model(5), Fault::Feasibility, engine_options())
        .run()
        .await
        .unwrap();
    let VerificationResult::Unknown { reason } = &report.result else {
        panic!("expected UNKNOWN, got {}", report.result);
    };
    assert!(!report.status.sound);
    assert!(reason.contains("status"), "reason: {reason}");
}

#[tokio::test]
async fn deadline_ends_the_run_as_unknown() {
    let options = EngineOptions {
        timeout_secs: 1,
        ..engine_options()
    };
    let started = Instant::now();
    let report = faulty_scheduler(guarded_model(0), Fault::Stall, options)
        .run()
        .await
        .unwrap();
    let VerificationResult::Unknown { reason } = &report.result else {
        panic!("expected UNKNOWN, got {}", report.result);
    };
    assert!(reason.contains("timed out"), "reason: {reason}");
    assert!(started.elapsed() < Duration::from_secs(10));
}
