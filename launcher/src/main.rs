use std::sync::Arc;

use launcher::actors::analysis_state::{get_snapshot, AnalysisStateActor};
use launcher::config::Config;
use launcher::fetch::DatasetFetcher;
use launcher::inputs::{AlgorithmInput, AlgorithmInputFile, InputResolver, LaunchAnalysisInputs};
use launcher::worker::ProcessWorkerFactory;
use launcher::{ActorCallbacks, AnalysisOrchestrator, LaunchRequest};
use ractor::Actor;
use shared_types::DatasetFlat;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "launcher=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!(
        worker = %config.worker_binary,
        num_threads = config.num_threads,
        "launcher starting"
    );

    let dataset_path = config
        .dataset_json_path
        .clone()
        .ok_or_else(|| anyhow::anyhow!("LAUNCHER_DATASET_JSON is not set"))?;
    let dataset_json = tokio::fs::read_to_string(&dataset_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", dataset_path.display()))?;
    let dataset: DatasetFlat = serde_json::from_str(&dataset_json)
        .map_err(|e| anyhow::anyhow!("invalid dataset description: {e}"))?;

    // A missing query is reported by the run itself as an unavailable input.
    let qry_fasta = config
        .query_fasta_path
        .clone()
        .map(|path| Arc::new(AlgorithmInputFile::new(path)) as Arc<dyn AlgorithmInput>);

    let fetcher = DatasetFetcher::new(&config.dataset_server_url, config.fetch_timeout)?;
    let orchestrator = AnalysisOrchestrator::new(
        InputResolver::new(fetcher),
        ProcessWorkerFactory::from_config(&config),
    );

    let (state, state_handle) = Actor::spawn(None, AnalysisStateActor, ())
        .await
        .map_err(|e| anyhow::anyhow!("failed to start analysis state actor: {e}"))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling analysis run");
                cancel.cancel();
            }
        }
    });

    let request = LaunchRequest {
        qry_fasta,
        inputs: LaunchAnalysisInputs::default(),
        dataset,
        num_threads: config.num_threads,
    };
    let mut callbacks = ActorCallbacks::new(state.clone());
    let report = orchestrator.run(request, &mut callbacks, cancel).await;
    info!(run_id = %report.run_id, outcome = ?report.outcome, "run finished");

    let snapshot = get_snapshot(&state)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read analysis state: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    state.stop(None);
    let _ = state_handle.await;

    if !report.is_completed() {
        std::process::exit(1);
    }
    Ok(())
}
