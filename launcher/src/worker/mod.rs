//! Engine worker lifecycle
//!
//! A `WorkerBackend` is one spawned computation unit behind some transport
//! (see `process` for the child-process implementation). `WorkerHandle` wraps
//! a backend and enforces the lifecycle:
//!
//! `Unstarted -> Initialized -> Running -> Terminated`
//!
//! `destroy` is accepted from every state and is idempotent.

pub mod process;

use async_trait::async_trait;
use shared_types::{AnalysisParams, EngineEvent, EngineOp};
use tokio::sync::mpsc;

pub use process::{ProcessWorker, ProcessWorkerFactory};

/// Tagged event channel produced by a worker
pub type WorkerEvents = mpsc::Receiver<EngineEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unstarted,
    Initialized,
    Running,
    Terminated,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Unstarted => write!(f, "unstarted"),
            WorkerState::Initialized => write!(f, "initialized"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Worker rejected {op}: {message}")]
    Rejected { op: EngineOp, message: String },

    #[error("Worker did not acknowledge {op} within {timeout_ms}ms")]
    AckTimeout { op: EngineOp, timeout_ms: u64 },

    #[error("Worker exited before acknowledging {0}")]
    Exited(EngineOp),

    #[error("Worker I/O error: {0}")]
    Io(String),

    #[error("Cannot {op} a worker that is {state}")]
    InvalidTransition { op: &'static str, state: WorkerState },

    #[error("Worker event channel was already taken")]
    EventsTaken,
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        WorkerError::Io(e.to_string())
    }
}

/// One computation resource behind an arbitrary transport
#[async_trait]
pub trait WorkerBackend: Send {
    /// One-time configuration: thread budget and resolved parameters
    async fn init(&mut self, num_threads: usize, params: &AnalysisParams)
        -> Result<(), WorkerError>;

    /// Starts processing. Returns once processing has started, not finished.
    async fn launch(&mut self, qry_fasta_str: &str) -> Result<(), WorkerError>;

    /// Forced teardown. Must be safe mid-computation and when called twice.
    async fn destroy(&mut self) -> Result<(), WorkerError>;

    /// The event channel. Yields `Some` once.
    fn take_events(&mut self) -> Option<WorkerEvents>;
}

/// Creates one backend per run
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    type Worker: WorkerBackend + 'static;

    async fn spawn(&self) -> Result<Self::Worker, WorkerError>;
}

// ============================================================================
// WorkerHandle
// ============================================================================

pub struct WorkerHandle<W: WorkerBackend> {
    worker: W,
    state: WorkerState,
}

impl<W: WorkerBackend> WorkerHandle<W> {
    pub async fn spawn<F>(factory: &F) -> Result<Self, WorkerError>
    where
        F: WorkerFactory<Worker = W>,
    {
        let worker = factory.spawn().await?;
        tracing::debug!("Worker spawned");
        Ok(Self::from_backend(worker))
    }

    pub fn from_backend(worker: W) -> Self {
        Self {
            worker,
            state: WorkerState::Unstarted,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn backend(&self) -> &W {
        &self.worker
    }

    pub async fn init(
        &mut self,
        num_threads: usize,
        params: &AnalysisParams,
    ) -> Result<(), WorkerError> {
        self.expect_state("init", WorkerState::Unstarted)?;
        self.worker.init(num_threads, params).await?;
        self.state = WorkerState::Initialized;
        tracing::debug!(num_threads, "Worker initialized");
        Ok(())
    }

    pub async fn launch(&mut self, qry_fasta_str: &str) -> Result<(), WorkerError> {
        self.expect_state("launch", WorkerState::Initialized)?;
        self.worker.launch(qry_fasta_str).await?;
        self.state = WorkerState::Running;
        tracing::debug!(bytes = qry_fasta_str.len(), "Worker launched");
        Ok(())
    }

    pub fn take_events(&mut self) -> Result<WorkerEvents, WorkerError> {
        if self.state == WorkerState::Terminated {
            return Err(WorkerError::InvalidTransition {
                op: "subscribe to",
                state: self.state,
            });
        }
        self.worker.take_events().ok_or(WorkerError::EventsTaken)
    }

    /// Tears the worker down. Later calls are no-ops.
    pub async fn destroy(&mut self) {
        if self.state == WorkerState::Terminated {
            tracing::debug!("Worker already terminated; destroy is a no-op");
            return;
        }

        let previous = self.state;
        self.state = WorkerState::Terminated;
        if let Err(e) = self.worker.destroy().await {
            tracing::warn!(error = %e, from = %previous, "Worker teardown reported an error");
        } else {
            tracing::debug!(from = %previous, "Worker destroyed");
        }
    }

    fn expect_state(&self, op: &'static str, expected: WorkerState) -> Result<(), WorkerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkerError::InvalidTransition {
                op,
                state: self.state,
            })
        }
    }
}
