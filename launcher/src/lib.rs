//! Analysis launcher - orchestration core for the sequence-analysis engine
//!
//! This crate resolves run inputs, drives one engine worker per run and
//! streams its four result sequences (status, parsed records, results, tree)
//! back to a caller-supplied callback surface.

pub mod actors;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod inputs;
pub mod orchestrator;
pub mod worker;

pub use callbacks::{ActorCallbacks, LaunchAnalysisCallbacks};
pub use error::AnalysisError;
pub use orchestrator::{AnalysisOrchestrator, LaunchRequest, RunOutcome, RunReport};
