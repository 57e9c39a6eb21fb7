//! Child-process engine transport
//!
//! The engine executable is spawned with piped stdin/stdout and speaks
//! newline-delimited JSON: `EngineCommand`s go in, `EngineEvent`s come out.
//! `init` and `launch` wait for the matching `ack`/`nack`. Every other event
//! is forwarded to the run's event channel by a reader task.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use shared_types::{AnalysisParams, EngineCommand, EngineEvent, EngineOp, StreamKind};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use super::{WorkerBackend, WorkerError, WorkerEvents, WorkerFactory};
use crate::config::Config;

/// Upper bound for a single engine output line (results carry alignments)
const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

type AckReply = Result<EngineOp, (EngineOp, String)>;

#[derive(Debug, Clone)]
pub struct ProcessWorkerFactory {
    binary: String,
    args: Vec<String>,
    ack_timeout: Duration,
    shutdown_timeout: Duration,
    event_buffer: usize,
}

impl ProcessWorkerFactory {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        let defaults = Config::default();
        Self {
            binary: binary.into(),
            args,
            ack_timeout: defaults.worker_ack_timeout,
            shutdown_timeout: defaults.worker_shutdown_timeout,
            event_buffer: defaults.event_buffer,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.worker_binary.clone(),
            args: config.worker_args.clone(),
            ack_timeout: config.worker_ack_timeout,
            shutdown_timeout: config.worker_shutdown_timeout,
            event_buffer: config.event_buffer,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    type Worker = ProcessWorker;

    async fn spawn(&self) -> Result<ProcessWorker, WorkerError> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(binary = %self.binary, "failed to spawn engine: {e}");
                WorkerError::Spawn(format!("{}: {e}", self.binary))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Spawn("engine stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Spawn("engine stdout is not piped".to_string()))?;

        let pid = child.id();
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump_engine_output(stdout, events_tx, acks_tx));

        info!(binary = %self.binary, pid = ?pid, "engine process started");

        Ok(ProcessWorker {
            child: Some(child),
            pid,
            stdin: Some(FramedWrite::new(stdin, LinesCodec::new())),
            acks: acks_rx,
            events: Some(events_rx),
            reader: Some(reader),
            ack_timeout: self.ack_timeout,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

pub struct ProcessWorker {
    child: Option<Child>,
    pid: Option<u32>,
    stdin: Option<FramedWrite<ChildStdin, LinesCodec>>,
    acks: mpsc::UnboundedReceiver<AckReply>,
    events: Option<WorkerEvents>,
    reader: Option<JoinHandle<()>>,
    ack_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ProcessWorker {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn send_command(&mut self, command: &EngineCommand) -> Result<(), WorkerError> {
        let line = serde_json::to_string(command)
            .map_err(|e| WorkerError::Io(format!("failed to encode engine command: {e}")))?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| WorkerError::Io("engine stdin is closed".to_string()))?;
        stdin
            .send(line)
            .await
            .map_err(|e| WorkerError::Io(format!("failed to write to engine: {e}")))
    }

    async fn wait_for_ack(&mut self, op: EngineOp) -> Result<(), WorkerError> {
        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        loop {
            let reply = tokio::time::timeout_at(deadline, self.acks.recv())
                .await
                .map_err(|_| WorkerError::AckTimeout {
                    op,
                    timeout_ms: self.ack_timeout.as_millis() as u64,
                })?;

            match reply {
                None => return Err(WorkerError::Exited(op)),
                Some(Ok(acked)) if acked == op => return Ok(()),
                Some(Err((rejected, message))) if rejected == op => {
                    return Err(WorkerError::Rejected { op, message });
                }
                Some(other) => {
                    warn!(expected = %op, reply = ?other, "ignoring unexpected engine acknowledgement");
                }
            }
        }
    }
}

#[async_trait]
impl WorkerBackend for ProcessWorker {
    async fn init(
        &mut self,
        num_threads: usize,
        params: &AnalysisParams,
    ) -> Result<(), WorkerError> {
        self.send_command(&EngineCommand::Init {
            num_threads,
            params: params.clone(),
        })
        .await?;
        self.wait_for_ack(EngineOp::Init).await
    }

    async fn launch(&mut self, qry_fasta_str: &str) -> Result<(), WorkerError> {
        self.send_command(&EngineCommand::Launch {
            qry_fasta_str: qry_fasta_str.to_string(),
        })
        .await?;
        self.wait_for_ack(EngineOp::Launch).await
    }

    async fn destroy(&mut self) -> Result<(), WorkerError> {
        // Drop the channel first so nothing the engine still prints is delivered.
        self.events = None;

        if self.stdin.is_some() {
            let sent = tokio::time::timeout(
                self.shutdown_timeout,
                self.send_command(&EngineCommand::Shutdown),
            )
            .await;
            if !matches!(sent, Ok(Ok(()))) {
                debug!(pid = ?self.pid, "engine did not take shutdown command");
            }
        }
        self.stdin = None;

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = ?self.pid, %status, "engine exited after shutdown");
                return Ok(());
            }
            Ok(Err(e)) => warn!(pid = ?self.pid, error = %e, "failed to wait for engine"),
            Err(_) => debug!(pid = ?self.pid, "engine still running after shutdown; killing"),
        }

        child.start_kill()?;
        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?self.pid, %status, "engine process killed");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WorkerError::Io(format!(
                "engine process {:?} was not reaped within {}ms",
                self.pid,
                self.shutdown_timeout.as_millis()
            ))),
        }
    }

    fn take_events(&mut self) -> Option<WorkerEvents> {
        self.events.take()
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.child.is_some() {
            warn!(pid = ?self.pid, "engine worker dropped without destroy; killing process");
        }
    }
}

/// Decodes engine stdout until EOF. Acks go to the lifecycle calls, everything
/// else to the event channel. Dropping `events_tx` on return closes the channel.
async fn pump_engine_output(
    stdout: ChildStdout,
    events_tx: mpsc::Sender<EngineEvent>,
    acks_tx: mpsc::UnboundedSender<AckReply>,
) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    while let Some(line) = lines.next().await {
        let event = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match serde_json::from_str::<EngineEvent>(&line) {
                Ok(event) => event,
                Err(e) => EngineEvent::StreamError {
                    stream: StreamKind::AnalysisResults,
                    message: format!("malformed engine message: {e}"),
                },
            },
            Err(e) => EngineEvent::StreamError {
                stream: StreamKind::AnalysisResults,
                message: format!("failed to read engine output: {e}"),
            },
        };

        match event {
            EngineEvent::Ack { op } => {
                let _ = acks_tx.send(Ok(op));
            }
            EngineEvent::Nack { op, message } => {
                let _ = acks_tx.send(Err((op, message)));
            }
            event => {
                if events_tx.send(event).await.is_err() {
                    debug!("event consumer is gone; discarding remaining engine output");
                    break;
                }
            }
        }
    }

    debug!("engine output closed");
}
