use shared_types::{LogicalInput, StreamKind};

use crate::worker::WorkerError;

/// Fatal run errors. Each run reports at most one of these through `on_error`.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("{role} data is not available, but required")]
    InputUnavailable { role: LogicalInput },

    #[error("Failed to resolve {role}: {reason}")]
    ResolutionFailure { role: LogicalInput, reason: String },

    #[error("Worker lifecycle error: {0}")]
    WorkerLifecycle(#[from] WorkerError),

    #[error("Stream '{stream}' failed: {message}")]
    Stream { stream: StreamKind, message: String },

    #[error("Analysis run was cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Stable short code for logs and the UI
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::InputUnavailable { .. } => "input_unavailable",
            AnalysisError::ResolutionFailure { .. } => "resolution_failure",
            AnalysisError::WorkerLifecycle(_) => "worker_lifecycle",
            AnalysisError::Stream { .. } => "stream_error",
            AnalysisError::Cancelled => "cancelled",
        }
    }
}
