//! Process Worker Integration Tests
//!
//! Runs `ProcessWorker` against small engines scripted in `/bin/sh` that
//! speak the JSON-lines protocol on stdin/stdout.

use std::sync::Arc;
use std::time::Duration;

use shared_types::{
    AlgorithmGlobalStatus, AnalysisParams, DatasetFiles, DatasetFlat, EngineEvent, EngineOp,
    FastaRecordId, LogicalInput, StreamKind,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use launcher::fetch::DatasetFetcher;
use launcher::inputs::{AlgorithmInputString, InputResolver, LaunchAnalysisInputs};
use launcher::worker::{ProcessWorkerFactory, WorkerError, WorkerHandle, WorkerState};
use launcher::{AnalysisError, AnalysisOrchestrator, LaunchAnalysisCallbacks, LaunchRequest};

fn process_exists(pid: u32) -> bool {
    let output = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "pid="])
        .output();

    match output {
        Ok(output) => {
            output.status.success() && !String::from_utf8_lossy(&output.stdout).trim().is_empty()
        }
        Err(_) => false,
    }
}

/// Engine that answers every command from `on_init` / `on_launch` and exits
/// on shutdown.
fn scripted_engine(on_init: &str, on_launch: &str) -> ProcessWorkerFactory {
    let script = format!(
        r#"while IFS= read -r line; do
  case "$line" in
    *'"type":"init"'*)
{on_init}
      ;;
    *'"type":"launch"'*)
{on_launch}
      ;;
    *'"type":"shutdown"'*)
      exit 0
      ;;
  esac
done"#
    );
    ProcessWorkerFactory::new("/bin/sh", vec!["-c".to_string(), script])
        .with_ack_timeout(Duration::from_secs(5))
        .with_shutdown_timeout(Duration::from_millis(500))
}

const ACK_INIT: &str = r#"      echo '{"type":"ack","op":"init"}'"#;

const TWO_RECORD_RUN: &str = r#"      echo '{"type":"ack","op":"launch"}'
      echo '{"type":"global_status","status":"started"}'
      echo '{"type":"parsed_fasta","index":0,"seq_name":"alpha"}'
      echo '{"type":"analysis_result","index":0,"seq_name":"alpha","outcome":{"status":"success","result":{"clade":"20A"}}}'
      echo '{"type":"parsed_fasta","index":1,"seq_name":"beta"}'
      echo '{"type":"stream_complete","stream":"parsed_fasta"}'
      echo '{"type":"analysis_result","index":1,"seq_name":"beta","outcome":{"status":"error","message":"too many gaps"}}'
      echo '{"type":"tree","tree":{"tree":{"name":"root"}}}'
      echo '{"type":"stream_complete","stream":"tree"}'
      echo '{"type":"global_status","status":"done"}'
      echo '{"type":"stream_complete","stream":"global_status"}'
      echo '{"type":"stream_complete","stream":"analysis_results"}'"#;

#[derive(Default)]
struct Collected {
    statuses: Vec<AlgorithmGlobalStatus>,
    parsed: Vec<FastaRecordId>,
    failed_records: usize,
    results: usize,
    trees: usize,
    errors: Vec<AnalysisError>,
    completed: usize,
}

impl LaunchAnalysisCallbacks for Collected {
    fn on_global_status(&mut self, status: AlgorithmGlobalStatus) {
        self.statuses.push(status);
    }

    fn on_parsed_fasta(&mut self, record: FastaRecordId) {
        self.parsed.push(record);
    }

    fn on_analysis_result(&mut self, result: shared_types::AnalysisResult) {
        self.results += 1;
        if !result.is_success() {
            self.failed_records += 1;
        }
    }

    fn on_tree(&mut self, _tree: serde_json::Value) {
        self.trees += 1;
    }

    fn on_error(&mut self, error: AnalysisError) {
        self.errors.push(error);
    }

    fn on_complete(&mut self) {
        self.completed += 1;
    }
}

fn explicit_request() -> LaunchRequest {
    let mut inputs = LaunchAnalysisInputs::default();
    for role in LogicalInput::PARAMS {
        inputs.set(role, Arc::new(AlgorithmInputString::new(format!("{role} content"))));
    }
    LaunchRequest {
        qry_fasta: Some(Arc::new(AlgorithmInputString::new(">alpha\nACGT\n>beta\nAC--\n"))),
        inputs,
        dataset: DatasetFlat {
            name: "test".to_string(),
            name_friendly: None,
            tag: None,
            files: DatasetFiles::default(),
        },
        num_threads: 2,
    }
}

#[tokio::test]
async fn test_full_run_through_process_engine() {
    let orchestrator = AnalysisOrchestrator::new(
        InputResolver::new(DatasetFetcher::without_server(reqwest::Client::new())),
        scripted_engine(ACK_INIT, TWO_RECORD_RUN),
    );
    let mut collected = Collected::default();

    let report = timeout(
        Duration::from_secs(10),
        orchestrator.run(explicit_request(), &mut collected, CancellationToken::new()),
    )
    .await
    .expect("run timed out");

    assert!(report.is_completed(), "outcome: {:?}", report.outcome);
    assert_eq!(
        collected.statuses,
        vec![AlgorithmGlobalStatus::Started, AlgorithmGlobalStatus::Done]
    );
    assert_eq!(
        collected.parsed.iter().map(|r| r.seq_name.as_str()).collect::<Vec<_>>(),
        vec!["alpha", "beta"]
    );
    assert_eq!(collected.results, 2);
    assert_eq!(collected.failed_records, 1);
    assert_eq!(collected.trees, 1);
    assert!(collected.errors.is_empty());
    assert_eq!(collected.completed, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_results_completion_ends_run_with_engine_still_reading() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let pid_file = dir.path().join("engine.pid");
    let on_init = format!(
        "      echo $$ > '{}'\n{ACK_INIT}",
        pid_file.display()
    );
    // Only the results stream completes, then the engine waits for the next command.
    let on_launch = r#"      echo '{"type":"ack","op":"launch"}'
      echo '{"type":"global_status","status":"started"}'
      echo '{"type":"parsed_fasta","index":0,"seq_name":"alpha"}'
      echo '{"type":"analysis_result","index":0,"seq_name":"alpha","outcome":{"status":"success","result":{}}}'
      echo '{"type":"tree","tree":{"tree":{}}}'
      echo '{"type":"stream_complete","stream":"analysis_results"}'"#;
    let orchestrator = AnalysisOrchestrator::new(
        InputResolver::new(DatasetFetcher::without_server(reqwest::Client::new())),
        scripted_engine(&on_init, on_launch),
    );
    let mut collected = Collected::default();

    let report = timeout(
        Duration::from_secs(10),
        orchestrator.run(explicit_request(), &mut collected, CancellationToken::new()),
    )
    .await
    .expect("run did not end after results completed");

    assert!(report.is_completed(), "outcome: {:?}", report.outcome);
    assert_eq!(collected.completed, 1);
    assert_eq!(collected.trees, 1);
    assert_eq!(collected.results, 1);
    assert!(collected.errors.is_empty(), "errors: {:?}", collected.errors);

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("engine did not write its pid")
        .trim()
        .parse()
        .expect("pid file is not a number");
    assert!(!process_exists(pid), "engine {pid} still running");
}

#[tokio::test]
async fn test_init_nack_is_rejected() {
    let factory = scripted_engine(
        r#"      echo '{"type":"nack","op":"init","message":"unable to parse gene map"}'"#,
        TWO_RECORD_RUN,
    );
    let mut handle = WorkerHandle::spawn(&factory).await.expect("spawn failed");

    let err = handle
        .init(1, &AnalysisParams::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkerError::Rejected {
            op: EngineOp::Init,
            message: "unable to parse gene map".to_string()
        }
    );
    assert_eq!(handle.state(), WorkerState::Unstarted);
    handle.destroy().await;
}

#[tokio::test]
async fn test_silent_engine_times_out() {
    let factory = ProcessWorkerFactory::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "while IFS= read -r line; do :; done".to_string(),
        ],
    )
    .with_ack_timeout(Duration::from_millis(200))
    .with_shutdown_timeout(Duration::from_millis(200));
    let mut handle = WorkerHandle::spawn(&factory).await.expect("spawn failed");

    let err = handle
        .init(1, &AnalysisParams::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WorkerError::AckTimeout {
            op: EngineOp::Init,
            timeout_ms: 200
        }
    );
    handle.destroy().await;
    assert_eq!(handle.state(), WorkerState::Terminated);
}

#[tokio::test]
async fn test_engine_exit_before_ack() {
    let factory = ProcessWorkerFactory::new("/bin/sh", vec!["-c".to_string(), "exit 3".to_string()])
        .with_ack_timeout(Duration::from_secs(5));
    let mut handle = WorkerHandle::spawn(&factory).await.expect("spawn failed");

    let err = handle
        .init(1, &AnalysisParams::default())
        .await
        .unwrap_err();
    // Depending on timing the write hits a closed pipe or the ack never comes.
    assert!(
        matches!(err, WorkerError::Exited(EngineOp::Init) | WorkerError::Io(_)),
        "unexpected error: {err:?}"
    );
    handle.destroy().await;
}

#[tokio::test]
async fn test_malformed_line_becomes_stream_error() {
    let factory = scripted_engine(
        ACK_INIT,
        r#"      echo '{"type":"ack","op":"launch"}'
      echo 'this is not json'"#,
    );
    let mut handle = WorkerHandle::spawn(&factory).await.expect("spawn failed");
    handle.init(1, &AnalysisParams::default()).await.unwrap();
    let mut events = handle.take_events().unwrap();
    handle.launch(">a\nACGT\n").await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event from engine")
        .expect("event channel closed");
    match event {
        EngineEvent::StreamError { stream, message } => {
            assert_eq!(stream, StreamKind::AnalysisResults);
            assert!(message.contains("malformed"), "message: {message}");
        }
        other => panic!("expected stream error, got {other:?}"),
    }
    handle.destroy().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_destroy_mid_computation_kills_engine() {
    // After acking launch the engine stops reading stdin and never exits.
    let factory = scripted_engine(
        ACK_INIT,
        r#"      echo '{"type":"ack","op":"launch"}'
      exec sleep 30"#,
    )
    .with_shutdown_timeout(Duration::from_millis(300));
    let mut handle = WorkerHandle::spawn(&factory).await.expect("spawn failed");
    let pid = handle.backend().pid().expect("engine has no pid");

    handle.init(2, &AnalysisParams::default()).await.unwrap();
    handle.launch(">a\nACGT\n").await.unwrap();
    assert!(process_exists(pid));

    timeout(Duration::from_secs(5), handle.destroy())
        .await
        .expect("destroy hung");
    assert_eq!(handle.state(), WorkerState::Terminated);
    assert!(!process_exists(pid), "engine {pid} still running");

    // Second destroy is a no-op.
    handle.destroy().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_command_stops_idle_engine() {
    let factory = scripted_engine(ACK_INIT, TWO_RECORD_RUN);
    let mut handle = WorkerHandle::spawn(&factory).await.expect("spawn failed");
    let pid = handle.backend().pid().expect("engine has no pid");
    handle.init(1, &AnalysisParams::default()).await.unwrap();

    timeout(Duration::from_secs(5), handle.destroy())
        .await
        .expect("destroy hung");
    assert!(!process_exists(pid));
}
