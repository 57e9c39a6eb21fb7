use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Engine executable spawned once per run
    pub worker_binary: String,
    /// Extra arguments passed to the engine executable
    pub worker_args: Vec<String>,
    /// Thread budget handed to the engine on `init`
    pub num_threads: usize,
    /// Base URL that relative dataset file URLs are resolved against
    pub dataset_server_url: String,
    /// Per-request timeout for dataset file downloads
    pub fetch_timeout: Duration,
    /// How long to wait for the engine to acknowledge `init` / `launch`
    pub worker_ack_timeout: Duration,
    /// How long to wait for a killed engine process to be reaped
    pub worker_shutdown_timeout: Duration,
    /// Capacity of the worker event channel
    pub event_buffer: usize,
    /// Query fasta used by the `launcher` binary
    pub query_fasta_path: Option<PathBuf>,
    /// Dataset description (JSON `DatasetFlat`) used by the `launcher` binary
    pub dataset_json_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            worker_binary: env_str("LAUNCHER_WORKER_BINARY", "nextclade-engine"),
            worker_args: env_csv("LAUNCHER_WORKER_ARGS", &[]),
            num_threads: env_parse("LAUNCHER_NUM_THREADS", default_num_threads())?.max(1),
            dataset_server_url: env_str("LAUNCHER_DATASET_SERVER_URL", "http://localhost:3000/"),
            fetch_timeout: Duration::from_secs(env_parse("LAUNCHER_FETCH_TIMEOUT_SECS", 60)?),
            worker_ack_timeout: Duration::from_secs(env_parse(
                "LAUNCHER_WORKER_ACK_TIMEOUT_SECS",
                30,
            )?),
            worker_shutdown_timeout: Duration::from_millis(env_parse(
                "LAUNCHER_WORKER_SHUTDOWN_TIMEOUT_MS",
                2000,
            )?),
            event_buffer: env_parse("LAUNCHER_EVENT_BUFFER", 1024_usize)?.max(1),
            query_fasta_path: std::env::var("LAUNCHER_QUERY_FASTA").ok().map(PathBuf::from),
            dataset_json_path: std::env::var("LAUNCHER_DATASET_JSON").ok().map(PathBuf::from),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_binary: "nextclade-engine".to_string(),
            worker_args: Vec::new(),
            num_threads: default_num_threads(),
            dataset_server_url: "http://localhost:3000/".to_string(),
            fetch_timeout: Duration::from_secs(60),
            worker_ack_timeout: Duration::from_secs(30),
            worker_shutdown_timeout: Duration::from_millis(2000),
            event_buffer: 1024,
            query_fasta_path: None,
            dataset_json_path: None,
        }
    }
}

/// Thread budget guess: one engine thread per available core.
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(1)
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
