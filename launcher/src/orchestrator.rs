//! AnalysisOrchestrator - drives one analysis run end to end
//!
//! A run moves through
//!
//! `Idle -> Resolving -> Launching -> Streaming -> {Completed | Failed} -> TornDown`
//!
//! Every exit path (success, input failure, worker failure, stream failure,
//! cancellation) goes through the same teardown: release all subscriptions,
//! then destroy the worker. The caller hears exactly one of `on_complete` or
//! `on_error`, and only after teardown has finished.

use shared_types::{AlgorithmGlobalStatus, DatasetFlat, StreamKind};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use ulid::Ulid;

use crate::callbacks::LaunchAnalysisCallbacks;
use crate::error::AnalysisError;
use crate::events::{Delivery, EventMultiplexer};
use crate::inputs::{InputResolver, InputSource, LaunchAnalysisInputs};
use crate::worker::{WorkerBackend, WorkerFactory, WorkerHandle};

/// Everything a caller supplies for one run
#[derive(Clone)]
pub struct LaunchRequest {
    pub qry_fasta: InputSource,
    pub inputs: LaunchAnalysisInputs,
    pub dataset: DatasetFlat,
    pub num_threads: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed(AnalysisError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Idle,
    Resolving,
    Launching,
    Streaming,
    Completed,
    Failed,
    TornDown,
}

impl RunPhase {
    fn advance(&mut self, next: RunPhase) {
        tracing::info!(from = ?self, to = ?next, "Run state changed");
        *self = next;
    }
}

// ============================================================================
// RunHandle
// ============================================================================

/// Resources owned by one run. Dropped only after `teardown`.
struct RunHandle<W: WorkerBackend> {
    phase: RunPhase,
    worker: Option<WorkerHandle<W>>,
    mux: Option<EventMultiplexer>,
}

impl<W: WorkerBackend> RunHandle<W> {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            worker: None,
            mux: None,
        }
    }

    /// Unsubscribe everything, then destroy the worker. Safe to call twice.
    async fn teardown(&mut self) {
        if self.phase == RunPhase::TornDown {
            return;
        }

        if let Some(mux) = self.mux.as_mut() {
            let released = mux.unsubscribe_all();
            tracing::debug!(released, "Released stream subscriptions");
        }
        if let Some(worker) = self.worker.as_mut() {
            worker.destroy().await;
        }
        self.phase.advance(RunPhase::TornDown);
    }
}

// ============================================================================
// AnalysisOrchestrator
// ============================================================================

pub struct AnalysisOrchestrator<F: WorkerFactory> {
    resolver: InputResolver,
    factory: F,
}

impl<F: WorkerFactory> AnalysisOrchestrator<F> {
    pub fn new(resolver: InputResolver, factory: F) -> Self {
        Self { resolver, factory }
    }

    /// Runs one analysis to its end. Each call gets a fresh worker; nothing
    /// from an earlier run is reused and nothing is retried.
    pub async fn run<C: LaunchAnalysisCallbacks>(
        &self,
        request: LaunchRequest,
        callbacks: &mut C,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = Ulid::new().to_string();
        let span = tracing::info_span!("analysis_run", run_id = %run_id);
        self.run_inner(run_id, request, callbacks, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner<C: LaunchAnalysisCallbacks>(
        &self,
        run_id: String,
        request: LaunchRequest,
        callbacks: &mut C,
        cancel: CancellationToken,
    ) -> RunReport {
        tracing::info!(
            dataset = %request.dataset.name,
            num_threads = request.num_threads,
            "Starting analysis run"
        );
        callbacks.on_run_started(&run_id);

        let mut handle = RunHandle::<F::Worker>::new();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            result = self.drive(&mut handle, request, callbacks, &cancel) => result,
        };

        match &result {
            Ok(()) => handle.phase.advance(RunPhase::Completed),
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Analysis run failed");
                handle.phase.advance(RunPhase::Failed);
            }
        }

        handle.teardown().await;

        let outcome = match result {
            Ok(()) => {
                callbacks.on_complete();
                RunOutcome::Completed
            }
            Err(AnalysisError::Cancelled) => {
                callbacks.on_error(AnalysisError::Cancelled);
                RunOutcome::Cancelled
            }
            Err(e) => {
                callbacks.on_error(e.clone());
                RunOutcome::Failed(e)
            }
        };

        tracing::info!(outcome = ?outcome, "Analysis run finished");
        RunReport { run_id, outcome }
    }

    async fn drive<C: LaunchAnalysisCallbacks>(
        &self,
        handle: &mut RunHandle<F::Worker>,
        request: LaunchRequest,
        callbacks: &mut C,
        cancel: &CancellationToken,
    ) -> Result<(), AnalysisError> {
        handle.phase.advance(RunPhase::Resolving);
        let qry_fasta_str = self.resolver.resolve_query(request.qry_fasta).await?;
        let params = self
            .resolver
            .resolve_params(&request.inputs, &request.dataset)
            .await?;

        handle.phase.advance(RunPhase::Launching);
        let num_threads = request.num_threads.max(1);
        let worker = handle
            .worker
            .insert(WorkerHandle::spawn(&self.factory).await?);
        worker.init(num_threads, &params).await?;

        let mut mux = EventMultiplexer::new(worker.take_events()?);
        for stream in StreamKind::ALL {
            mux.subscribe(stream).map_err(|e| AnalysisError::Stream {
                stream,
                message: e.to_string(),
            })?;
        }
        let mux = handle.mux.insert(mux);

        worker.launch(&qry_fasta_str).await?;

        handle.phase.advance(RunPhase::Streaming);
        dispatch(mux, callbacks, cancel).await
    }
}

/// Forwards deliveries to the callbacks until the results sequence completes.
/// The other sequences may finish earlier or never signal completion. Any
/// stream error ends the run immediately.
async fn dispatch<C: LaunchAnalysisCallbacks>(
    mux: &mut EventMultiplexer,
    callbacks: &mut C,
    cancel: &CancellationToken,
) -> Result<(), AnalysisError> {
    let mut terminal_status: Option<AlgorithmGlobalStatus> = None;
    let mut tree_delivered = false;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            delivery = mux.next() => delivery,
        };

        let Some(delivery) = delivery else {
            return Err(results_cut_short());
        };

        match delivery {
            Delivery::GlobalStatus(status) => {
                if let Some(terminal) = terminal_status {
                    tracing::debug!(?terminal, ignored = ?status, "Dropping status after terminal status");
                    continue;
                }
                if status.is_terminal() {
                    terminal_status = Some(status);
                }
                callbacks.on_global_status(status);
            }
            Delivery::ParsedFasta(record) => callbacks.on_parsed_fasta(record),
            Delivery::AnalysisResult(result) => callbacks.on_analysis_result(result),
            Delivery::Tree(tree) => {
                if tree_delivered {
                    tracing::warn!("Dropping second tree");
                    continue;
                }
                tree_delivered = true;
                callbacks.on_tree(tree);
            }
            Delivery::Completed(StreamKind::AnalysisResults) => {
                tracing::debug!("Results stream completed");
                return Ok(());
            }
            Delivery::Completed(stream) => {
                tracing::debug!(%stream, "Stream completed");
            }
            Delivery::Failed { stream, message } => {
                return Err(AnalysisError::Stream { stream, message });
            }
            Delivery::Disconnected => return Err(results_cut_short()),
        }
    }
}

fn results_cut_short() -> AnalysisError {
    AnalysisError::Stream {
        stream: StreamKind::AnalysisResults,
        message: "worker closed its event channel before results completed".to_string(),
    }
}
