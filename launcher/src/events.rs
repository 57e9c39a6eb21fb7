//! EventMultiplexer - four logical sequences over one tagged worker channel
//!
//! The worker emits a single stream of `EngineEvent`s. The multiplexer splits
//! it into the `global_status`, `parsed_fasta`, `analysis_results` and `tree`
//! sequences. Each sequence has one subscriber slot; events of sequences
//! nobody subscribed to are discarded. Order is kept within a sequence only.

use shared_types::{AlgorithmGlobalStatus, AnalysisResult, EngineEvent, FastaRecordId, StreamKind};

use crate::worker::WorkerEvents;

/// One item handed to the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    GlobalStatus(AlgorithmGlobalStatus),
    ParsedFasta(FastaRecordId),
    AnalysisResult(AnalysisResult),
    Tree(serde_json::Value),
    /// The sequence finished; its slot has been released
    Completed(StreamKind),
    Failed { stream: StreamKind, message: String },
    /// The worker dropped its end of the channel
    Disconnected,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MultiplexError {
    #[error("Stream '{0}' already has a subscriber")]
    AlreadySubscribed(StreamKind),

    #[error("Event channel is closed")]
    Closed,
}

pub struct EventMultiplexer {
    events: Option<WorkerEvents>,
    subscribed: [bool; 4],
}

impl EventMultiplexer {
    pub fn new(events: WorkerEvents) -> Self {
        Self {
            events: Some(events),
            subscribed: [false; 4],
        }
    }

    pub fn subscribe(&mut self, stream: StreamKind) -> Result<(), MultiplexError> {
        if self.events.is_none() {
            return Err(MultiplexError::Closed);
        }
        let slot = &mut self.subscribed[stream.slot()];
        if *slot {
            return Err(MultiplexError::AlreadySubscribed(stream));
        }
        *slot = true;
        tracing::debug!(%stream, "Subscribed");
        Ok(())
    }

    /// Returns whether the sequence was subscribed.
    pub fn unsubscribe(&mut self, stream: StreamKind) -> bool {
        let was = std::mem::replace(&mut self.subscribed[stream.slot()], false);
        if was {
            tracing::debug!(%stream, "Unsubscribed");
        }
        was
    }

    /// Releases every slot and closes the channel so the worker side sees the
    /// consumer is gone. Returns the number of slots released.
    pub fn unsubscribe_all(&mut self) -> usize {
        let released = StreamKind::ALL
            .into_iter()
            .filter(|stream| self.unsubscribe(*stream))
            .count();
        if let Some(mut events) = self.events.take() {
            events.close();
        }
        released
    }

    pub fn is_subscribed(&self, stream: StreamKind) -> bool {
        self.subscribed[stream.slot()]
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribed.iter().filter(|s| **s).count()
    }

    /// Next delivery for a subscribed sequence. Stream errors are delivered
    /// even for sequences that already completed or were never subscribed.
    /// `None` once nothing is subscribed or the channel has been closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            if self.active_subscriptions() == 0 {
                return None;
            }
            let events = self.events.as_mut()?;

            let Some(event) = events.recv().await else {
                self.events = None;
                return Some(Delivery::Disconnected);
            };

            let Some(stream) = event.stream() else {
                tracing::trace!(?event, "Ignoring acknowledgement on event channel");
                continue;
            };
            if !self.is_subscribed(stream) {
                if let EngineEvent::StreamError { message, .. } = event {
                    tracing::warn!(%stream, %message, "Stream error on released stream");
                    return Some(Delivery::Failed { stream, message });
                }
                tracing::trace!(%stream, "Discarding event without subscriber");
                continue;
            }

            let delivery = match event {
                EngineEvent::GlobalStatus { status } => Delivery::GlobalStatus(status),
                EngineEvent::ParsedFasta { index, seq_name } => {
                    Delivery::ParsedFasta(FastaRecordId { index, seq_name })
                }
                EngineEvent::AnalysisResult {
                    index,
                    seq_name,
                    outcome,
                } => Delivery::AnalysisResult(AnalysisResult {
                    index,
                    seq_name,
                    outcome,
                }),
                EngineEvent::Tree { tree } => Delivery::Tree(tree),
                EngineEvent::StreamComplete { stream } => {
                    self.unsubscribe(stream);
                    Delivery::Completed(stream)
                }
                EngineEvent::StreamError { stream, message } => Delivery::Failed { stream, message },
                EngineEvent::Ack { .. } | EngineEvent::Nack { .. } => continue,
            };
            return Some(delivery);
        }
    }
}
