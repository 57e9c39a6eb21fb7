//! AnalysisStateActor - application state folded from run callbacks
//!
//! The UI reads one `AnalysisSnapshot` per run. Updates arrive on four
//! independently ordered sequences, so a result may show up before the parse
//! event for the same index. Rows are keyed by index and filled from both
//! sides; nothing assumes monotonic indices.

use async_trait::async_trait;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{
    AlgorithmGlobalStatus, AnalysisResult, AnalysisRow, AnalysisSnapshot, FastaRecordId,
};

use crate::error::AnalysisError;

/// Actor that owns the state of the current run
#[derive(Debug, Default)]
pub struct AnalysisStateActor;

#[derive(Debug)]
pub enum AnalysisStateMsg {
    /// Forget the previous run and start tracking a new one
    Begin { run_id: String },
    GlobalStatus(AlgorithmGlobalStatus),
    ParsedFasta(FastaRecordId),
    AnalysisResult(AnalysisResult),
    Tree(serde_json::Value),
    Failed(AnalysisError),
    Completed,
    GetSnapshot {
        reply: RpcReplyPort<AnalysisSnapshot>,
    },
}

pub struct AnalysisStateState {
    snapshot: AnalysisSnapshot,
}

#[async_trait]
impl Actor for AnalysisStateActor {
    type Msg = AnalysisStateMsg;
    type State = AnalysisStateState;
    type Arguments = ();

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!(actor_id = %myself.get_id(), "AnalysisStateActor starting");
        Ok(AnalysisStateState {
            snapshot: AnalysisSnapshot::default(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let snapshot = &mut state.snapshot;

        match message {
            AnalysisStateMsg::Begin { run_id } => {
                *snapshot = AnalysisSnapshot {
                    run_id: Some(run_id),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                };
            }
            AnalysisStateMsg::GetSnapshot { reply } => {
                let _ = reply.send(snapshot.clone());
            }
            message if snapshot.is_finished() => {
                tracing::warn!(?message, "Run already finished; ignoring update");
            }
            AnalysisStateMsg::GlobalStatus(status) => apply_status(snapshot, status),
            AnalysisStateMsg::ParsedFasta(record) => apply_parsed(snapshot, record),
            AnalysisStateMsg::AnalysisResult(result) => apply_result(snapshot, result),
            AnalysisStateMsg::Tree(tree) => {
                if snapshot.tree.is_some() {
                    tracing::warn!("Tree delivered twice; keeping the first one");
                } else {
                    snapshot.tree = Some(tree);
                }
            }
            AnalysisStateMsg::Failed(error) => {
                tracing::error!(code = error.code(), error = %error, "Analysis run failed");
                snapshot.error = Some(error.to_string());
                if !snapshot.status.is_terminal() {
                    snapshot.status = AlgorithmGlobalStatus::Failed;
                }
                snapshot.finished_at = Some(Utc::now());
            }
            AnalysisStateMsg::Completed => {
                snapshot.completed = true;
                snapshot.finished_at = Some(Utc::now());
                tracing::info!(
                    parsed = snapshot.num_parsed,
                    results = snapshot.num_results,
                    failed_records = snapshot.num_failed_records,
                    "Analysis run completed"
                );
            }
        }

        Ok(())
    }
}

fn apply_status(snapshot: &mut AnalysisSnapshot, status: AlgorithmGlobalStatus) {
    if snapshot.status.is_terminal() {
        tracing::warn!(current = ?snapshot.status, ignored = ?status, "Status after terminal status");
        return;
    }
    snapshot.status = status;
}

fn apply_parsed(snapshot: &mut AnalysisSnapshot, record: FastaRecordId) {
    let row = snapshot
        .rows
        .entry(record.index)
        .or_insert_with(|| AnalysisRow {
            index: record.index,
            ..Default::default()
        });

    if row.seq_name.is_some() {
        tracing::warn!(index = record.index, "Record parsed twice; ignoring");
        return;
    }

    let had_result = row.result.is_some();
    row.seq_name = Some(record.seq_name);
    snapshot.num_parsed += 1;
    if had_result {
        snapshot.results_awaiting_parse = snapshot.results_awaiting_parse.saturating_sub(1);
    }
}

fn apply_result(snapshot: &mut AnalysisSnapshot, result: AnalysisResult) {
    let row = snapshot
        .rows
        .entry(result.index)
        .or_insert_with(|| AnalysisRow {
            index: result.index,
            ..Default::default()
        });

    if row.result.is_some() {
        tracing::warn!(index = result.index, "Second result for record; ignoring");
        return;
    }

    let parsed = row.seq_name.is_some();
    let failed = !result.is_success();
    row.result = Some(result.outcome);
    snapshot.num_results += 1;
    if failed {
        snapshot.num_failed_records += 1;
    }
    if !parsed {
        tracing::debug!(index = result.index, "Result arrived before its parse event");
        snapshot.results_awaiting_parse += 1;
    }
}

/// Convenience wrapper around `GetSnapshot`
pub async fn get_snapshot(
    actor: &ActorRef<AnalysisStateMsg>,
) -> Result<AnalysisSnapshot, ractor::RactorErr<AnalysisStateMsg>> {
    ractor::call!(actor, |reply| AnalysisStateMsg::GetSnapshot { reply })
}
