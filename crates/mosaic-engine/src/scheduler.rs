//! Concurrent execution of block workers.
//!
//! Each worker runs in its own task with an unbounded inbox. The
//! coordinator owns the [`MessageRouter`], counts deliveries that have not
//! finished a round yet, and decides the verdict:
//!
//! - a confirmed violation at the program entry ends the run as UNSAFE;
//! - quiescence (no delivery outstanding) with a sound merged status is SAFE;
//! - everything else (timeouts, budgets, analysis errors, cancellation, a
//!   status that lost soundness) is UNKNOWN.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mosaic_ir::{AlgorithmStatus, BlockGraph, BlockId, BlockSummaryMessage};

use crate::analysis::{AnalysisFactory, LocalAnalysis};
use crate::counterexample::Counterexample;
use crate::result::{RunStatistics, VerificationReport, VerificationResult};
use crate::router::MessageRouter;
use crate::timeout::{
    deadline_exceeded, deadline_from_timeout_secs, timeout_unknown_reason, worker_budget,
};
use crate::worker::{BlockWorker, RoundResult, WorkerConfig, WorkerError};
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Wall-clock limit for the whole run; `0` disables it.
    pub timeout_secs: u64,
    /// Rounds a single worker may run; `0` disables the limit.
    pub worker_round_budget: usize,
    /// Time a single worker may spend analysing; `0` disables the limit.
    pub worker_time_budget_ms: u64,
    pub suppress_top_postconditions: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            worker_round_budget: 10_000,
            worker_time_budget_ms: 0,
            suppress_top_postconditions: true,
        }
    }
}

/// Outcome of one worker round as seen by the coordinator.
#[derive(Debug)]
pub struct RoundReport {
    pub block: BlockId,
    pub messages: Vec<BlockSummaryMessage>,
    pub status: AlgorithmStatus,
    pub rounds: usize,
    pub fixpoint: bool,
    pub confirmed: Option<Counterexample>,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Round(RoundReport),
    Failed { block: BlockId, error: WorkerError },
    BudgetExhausted { block: BlockId, reason: String },
    Crashed { block: BlockId, reason: String },
}

/// Per-worker view kept by the coordinator.
#[derive(Debug, Clone, Copy)]
struct WorkerSnapshot {
    status: AlgorithmStatus,
    rounds: usize,
    fixpoint: bool,
}

enum RunEnd {
    Quiescent,
    Violation(Counterexample),
    Unknown(String),
}

pub struct Scheduler<F: AnalysisFactory> {
    graph: Arc<BlockGraph>,
    factory: F,
    options: EngineOptions,
    cancel: CancellationToken,
    program: Option<String>,
}

impl<F: AnalysisFactory> Scheduler<F> {
    pub fn new(graph: BlockGraph, factory: F, options: EngineOptions) -> Self {
        Self {
            graph: Arc::new(graph),
            factory,
            options,
            cancel: CancellationToken::new(),
            program: None,
        }
    }

    #[must_use]
    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program = Some(name.into());
        self
    }

    pub fn graph(&self) -> &BlockGraph {
        &self.graph
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Token that cancels the whole run; cancelling twice is harmless.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> Result<VerificationReport, EngineError> {
        let started = Instant::now();
        let router = MessageRouter::new(Arc::clone(&self.graph));

        let mut workers = Vec::with_capacity(self.graph.len());
        for block in self.graph.blocks() {
            let analysis = self.factory.create(block, &self.graph)?;
            let config = WorkerConfig::for_block(&self.graph, block.id())
                .with_top_suppression(self.options.suppress_top_postconditions);
            workers.push(BlockWorker::new(
                block.clone(),
                analysis,
                config,
                self.cancel.child_token(),
            ));
        }
        info!(
            blocks = workers.len(),
            root = %self.graph.root(),
            cyclic = self.graph.has_cycles(),
            "starting block summary analysis"
        );

        let (event_tx, mut events) = mpsc::unbounded_channel();
        let mut inboxes: BTreeMap<BlockId, mpsc::UnboundedSender<BlockSummaryMessage>> =
            BTreeMap::new();
        let mut tasks = JoinSet::new();
        let budget = WorkerBudget {
            rounds: self.options.worker_round_budget,
            time: worker_budget(self.options.worker_time_budget_ms),
        };
        for worker in workers {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.insert(worker.id().clone(), tx);
            tasks.spawn(run_worker(
                worker,
                rx,
                event_tx.clone(),
                budget,
                self.cancel.clone(),
            ));
        }
        drop(event_tx);

        let mut statistics = RunStatistics::default();
        let mut snapshots: BTreeMap<BlockId, WorkerSnapshot> = BTreeMap::new();
        let mut pending = inboxes.len();
        let deadline = deadline_from_timeout_secs(self.options.timeout_secs);

        let end = loop {
            if pending == 0 {
                break RunEnd::Quiescent;
            }
            if deadline_exceeded(deadline) {
                break RunEnd::Unknown(timeout_unknown_reason("Block summary analysis"));
            }
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    break RunEnd::Unknown("verification was cancelled".to_string());
                }
                _ = sleep_until(deadline.map(tokio::time::Instant::from_std)) => {
                    warn!(timeout_secs = self.options.timeout_secs, "verification deadline reached");
                    break RunEnd::Unknown(timeout_unknown_reason("Block summary analysis"));
                }
                event = events.recv() => event,
            };
            let Some(event) = next else {
                break RunEnd::Unknown("all workers stopped before the analysis finished".to_string());
            };
            match event {
                WorkerEvent::Round(report) => {
                    pending -= 1;
                    snapshots.insert(
                        report.block.clone(),
                        WorkerSnapshot {
                            status: report.status,
                            rounds: report.rounds,
                            fixpoint: report.fixpoint,
                        },
                    );
                    if let Some(counterexample) = report.confirmed {
                        break RunEnd::Violation(counterexample);
                    }
                    for message in report.messages {
                        match dispatch(&router, &inboxes, message, &mut statistics) {
                            Ok(delivered) => pending += delivered,
                            Err(err) => return Err(abort(&self.cancel, &mut tasks, err).await),
                        }
                    }
                }
                WorkerEvent::Failed { block, error } => {
                    match &error {
                        WorkerError::ProtocolViolation { .. } => {
                            error!(block = %block, error = %error, "protocol violation");
                            let err = EngineError::ProtocolViolation(error.to_string());
                            return Err(abort(&self.cancel, &mut tasks, err).await);
                        }
                        WorkerError::Cancelled { .. } => {
                            debug!(block = %block, "worker observed cancellation");
                        }
                        _ => warn!(block = %block, error = %error, "worker failed"),
                    }
                    break RunEnd::Unknown(error.to_string());
                }
                WorkerEvent::BudgetExhausted { block, reason } => {
                    warn!(block = %block, reason = %reason, "worker budget exhausted");
                    break RunEnd::Unknown(reason);
                }
                WorkerEvent::Crashed { block, reason } => {
                    error!(block = %block, reason = %reason, "worker task crashed");
                    let err = EngineError::Runtime(format!("worker '{block}' crashed: {reason}"));
                    return Err(abort(&self.cancel, &mut tasks, err).await);
                }
            }
        };

        self.cancel.cancel();
        drop(inboxes);
        drain(&mut tasks).await;

        let status = snapshots
            .values()
            .fold(AlgorithmStatus::SOUND_AND_PRECISE, |acc, s| acc.update(s.status));
        for (block, snapshot) in &snapshots {
            statistics.rounds_per_block.insert(block.clone(), snapshot.rounds);
            if snapshot.fixpoint {
                statistics.fixpoint_blocks.push(block.clone());
            }
        }
        statistics.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match end {
            RunEnd::Violation(counterexample) => VerificationResult::Unsafe { counterexample },
            RunEnd::Quiescent if statistics.lost_messages > 0 => VerificationResult::Unknown {
                reason: format!("{} messages could not be delivered", statistics.lost_messages),
            },
            RunEnd::Quiescent if !status.sound => VerificationResult::Unknown {
                reason: format!("analysis finished with status {status}"),
            },
            RunEnd::Quiescent => VerificationResult::Safe,
            RunEnd::Unknown(reason) => VerificationResult::Unknown { reason },
        };
        info!(
            verdict = result.verdict_class(),
            status = %status,
            rounds = statistics.total_rounds(),
            messages = statistics.total_messages(),
            elapsed_ms = statistics.elapsed_ms,
            "block summary analysis finished"
        );

        Ok(VerificationReport {
            program: self.program,
            blocks: self.graph.len(),
            result,
            status,
            statistics,
        })
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Send one message to every receiver the router names. Returns how many
/// deliveries are now outstanding; undeliverable copies count as lost.
fn dispatch(
    router: &MessageRouter,
    inboxes: &BTreeMap<BlockId, mpsc::UnboundedSender<BlockSummaryMessage>>,
    message: BlockSummaryMessage,
    statistics: &mut RunStatistics,
) -> Result<usize, EngineError> {
    let receivers = router.route(&message)?;
    statistics.record_routed(message.kind(), receivers.len());
    let mut delivered = 0;
    for receiver in receivers {
        let sent = inboxes
            .get(&receiver)
            .is_some_and(|inbox| inbox.send(message.clone()).is_ok());
        if sent {
            delivered += 1;
        } else {
            warn!(block = %receiver, kind = %message.kind(), "dropped message for stopped worker");
            statistics.lost_messages += 1;
        }
    }
    Ok(delivered)
}

/// Stop every worker and wait for them before surfacing `err`.
async fn abort(cancel: &CancellationToken, tasks: &mut JoinSet<()>, err: EngineError) -> EngineError {
    cancel.cancel();
    drain(tasks).await;
    err
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "worker task ended abnormally");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkerBudget {
    rounds: usize,
    time: Option<Duration>,
}

/// Run one round on the blocking pool, moving the worker in and back out.
async fn blocking_round<A, R>(
    worker: BlockWorker<A>,
    round: R,
) -> Result<(BlockWorker<A>, RoundResult, Duration), String>
where
    A: LocalAnalysis,
    R: FnOnce(&mut BlockWorker<A>) -> RoundResult + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut worker = worker;
        let started = Instant::now();
        let outcome = round(&mut worker);
        (worker, outcome, started.elapsed())
    })
    .await
    .map_err(|e| e.to_string())
}

async fn run_worker<A: LocalAnalysis>(
    worker: BlockWorker<A>,
    mut inbox: mpsc::UnboundedReceiver<BlockSummaryMessage>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    budget: WorkerBudget,
    cancel: CancellationToken,
) {
    let block = worker.id().clone();
    let mut spent = Duration::ZERO;

    let (mut worker, outcome, elapsed) =
        match blocking_round(worker, |w| w.perform_initial_analysis()).await {
            Ok(done) => done,
            Err(reason) => {
                let _ = events.send(WorkerEvent::Crashed { block, reason });
                return;
            }
        };
    spent += elapsed;
    if !report_round(&events, &mut worker, outcome) {
        return;
    }

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbox.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if budget.rounds > 0 && worker.rounds() >= budget.rounds {
            let _ = events.send(WorkerEvent::BudgetExhausted {
                block: block.clone(),
                reason: format!("block '{block}' exceeded its budget of {} rounds", budget.rounds),
            });
            break;
        }
        if let Some(limit) = budget.time.filter(|limit| spent > *limit) {
            let _ = events.send(WorkerEvent::BudgetExhausted {
                block: block.clone(),
                reason: format!(
                    "block '{block}' exceeded its analysis time budget of {} ms",
                    limit.as_millis()
                ),
            });
            break;
        }

        let (next, outcome, elapsed) = match blocking_round(worker, move |w| w.handle(&message)).await {
            Ok(done) => done,
            Err(reason) => {
                let _ = events.send(WorkerEvent::Crashed { block, reason });
                return;
            }
        };
        worker = next;
        spent += elapsed;
        if !report_round(&events, &mut worker, outcome) {
            break;
        }
    }

    worker.cancel();
    debug!(
        block = %block,
        rounds = worker.rounds(),
        busy_ms = u64::try_from(spent.as_millis()).unwrap_or(u64::MAX),
        "worker stopped"
    );
}

/// Forward a round outcome; false once the worker should stop.
fn report_round<A: LocalAnalysis>(
    events: &mpsc::UnboundedSender<WorkerEvent>,
    worker: &mut BlockWorker<A>,
    outcome: RoundResult,
) -> bool {
    let event = match outcome {
        Ok(messages) => WorkerEvent::Round(RoundReport {
            block: worker.id().clone(),
            messages,
            status: worker.status(),
            rounds: worker.rounds(),
            fixpoint: worker.is_fixpoint_reached(),
            confirmed: worker.take_confirmed_violation(),
        }),
        Err(error) => WorkerEvent::Failed {
            block: worker.id().clone(),
            error,
        },
    };
    let keep_going = matches!(event, WorkerEvent::Round(_));
    events.send(event).is_ok() && keep_going
}
