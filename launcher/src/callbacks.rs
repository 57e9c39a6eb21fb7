//! Caller callback surface of a run

use ractor::ActorRef;
use shared_types::{AlgorithmGlobalStatus, AnalysisResult, FastaRecordId};

use crate::actors::analysis_state::AnalysisStateMsg;
use crate::error::AnalysisError;

/// Sinks driven by the orchestrator. Exactly one of `on_complete` and
/// `on_error` is called per run, and nothing is called after it.
pub trait LaunchAnalysisCallbacks: Send {
    /// Called before anything else, with the id assigned to the run
    fn on_run_started(&mut self, _run_id: &str) {}

    fn on_global_status(&mut self, status: AlgorithmGlobalStatus);
    fn on_parsed_fasta(&mut self, record: FastaRecordId);
    fn on_analysis_result(&mut self, result: AnalysisResult);
    fn on_tree(&mut self, tree: serde_json::Value);
    fn on_error(&mut self, error: AnalysisError);
    fn on_complete(&mut self);
}

/// Forwards every callback to an `AnalysisStateActor`
#[derive(Debug, Clone)]
pub struct ActorCallbacks {
    state: ActorRef<AnalysisStateMsg>,
}

impl ActorCallbacks {
    pub fn new(state: ActorRef<AnalysisStateMsg>) -> Self {
        Self { state }
    }

    fn forward(&self, message: AnalysisStateMsg) {
        if let Err(e) = self.state.send_message(message) {
            tracing::warn!(error = %e, "Analysis state actor is gone; dropping update");
        }
    }
}

impl LaunchAnalysisCallbacks for ActorCallbacks {
    fn on_run_started(&mut self, run_id: &str) {
        self.forward(AnalysisStateMsg::Begin {
            run_id: run_id.to_string(),
        });
    }

    fn on_global_status(&mut self, status: AlgorithmGlobalStatus) {
        self.forward(AnalysisStateMsg::GlobalStatus(status));
    }

    fn on_parsed_fasta(&mut self, record: FastaRecordId) {
        self.forward(AnalysisStateMsg::ParsedFasta(record));
    }

    fn on_analysis_result(&mut self, result: AnalysisResult) {
        self.forward(AnalysisStateMsg::AnalysisResult(result));
    }

    fn on_tree(&mut self, tree: serde_json::Value) {
        self.forward(AnalysisStateMsg::Tree(tree));
    }

    fn on_error(&mut self, error: AnalysisError) {
        self.forward(AnalysisStateMsg::Failed(error));
    }

    fn on_complete(&mut self) {
        self.forward(AnalysisStateMsg::Completed);
    }
}
