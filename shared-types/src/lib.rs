//! Shared types between the web UI, the launcher and the analysis engine
//!
//! These types are used by:
//! - the launcher orchestration core (native Rust)
//! - the engine process on the other side of the worker boundary
//! - the web UI, through the generated TypeScript definitions
//!
//! `cargo test -p shared-types` writes those definitions to
//! `shared-types/bindings/generated.ts` (or below `TS_RS_EXPORT_DIR` when set).
//!
//! Serializable with serde for JSON lines over the worker pipe

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Inputs and Datasets
// ============================================================================

/// Named roles of data an analysis run needs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum LogicalInput {
    RefSeq,
    GeneMap,
    Tree,
    QcConfig,
    VirusProperties,
    PcrPrimers,
    QrySeq,
}

impl LogicalInput {
    /// Roles resolved into `AnalysisParams`. Query sequences are handled separately.
    pub const PARAMS: [LogicalInput; 6] = [
        LogicalInput::RefSeq,
        LogicalInput::GeneMap,
        LogicalInput::Tree,
        LogicalInput::QcConfig,
        LogicalInput::VirusProperties,
        LogicalInput::PcrPrimers,
    ];

    /// Dataset file used when no explicit input is given for this role
    pub fn dataset_file_key(self) -> Option<DatasetFileKey> {
        match self {
            LogicalInput::RefSeq => Some(DatasetFileKey::Reference),
            LogicalInput::GeneMap => Some(DatasetFileKey::GeneMap),
            LogicalInput::Tree => Some(DatasetFileKey::Tree),
            LogicalInput::QcConfig => Some(DatasetFileKey::Qc),
            LogicalInput::VirusProperties => Some(DatasetFileKey::VirusPropertiesJson),
            LogicalInput::PcrPrimers => Some(DatasetFileKey::Primers),
            LogicalInput::QrySeq => None,
        }
    }

    pub fn is_mandatory(self) -> bool {
        matches!(self, LogicalInput::QrySeq)
    }
}

impl std::fmt::Display for LogicalInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalInput::RefSeq => write!(f, "reference sequence"),
            LogicalInput::GeneMap => write!(f, "gene map"),
            LogicalInput::Tree => write!(f, "reference tree"),
            LogicalInput::QcConfig => write!(f, "QC config"),
            LogicalInput::VirusProperties => write!(f, "virus properties"),
            LogicalInput::PcrPrimers => write!(f, "PCR primers"),
            LogicalInput::QrySeq => write!(f, "sequence fasta"),
        }
    }
}

/// File roles a dataset provides defaults for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub enum DatasetFileKey {
    Reference,
    GeneMap,
    Tree,
    Qc,
    VirusPropertiesJson,
    Primers,
}

/// Default file URLs of a dataset. URLs may be absolute or relative to the dataset server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub struct DatasetFiles {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub gene_map: Option<String>,
    #[serde(default)]
    pub tree: Option<String>,
    #[serde(default)]
    pub qc: Option<String>,
    #[serde(default)]
    pub virus_properties_json: Option<String>,
    #[serde(default)]
    pub primers: Option<String>,
}

impl DatasetFiles {
    pub fn get(&self, key: DatasetFileKey) -> Option<&str> {
        let url = match key {
            DatasetFileKey::Reference => &self.reference,
            DatasetFileKey::GeneMap => &self.gene_map,
            DatasetFileKey::Tree => &self.tree,
            DatasetFileKey::Qc => &self.qc,
            DatasetFileKey::VirusPropertiesJson => &self.virus_properties_json,
            DatasetFileKey::Primers => &self.primers,
        };
        url.as_deref()
    }
}

/// A dataset as selected in the UI, flattened to what a run needs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub struct DatasetFlat {
    pub name: String,
    #[serde(default)]
    pub name_friendly: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    pub files: DatasetFiles,
}

/// Resolved parameter payloads handed to the engine on `init`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "generated.ts")]
pub struct AnalysisParams {
    pub ref_seq_str: String,
    pub gene_map_str: String,
    pub tree_str: String,
    pub qc_config_str: String,
    pub virus_properties_str: String,
    pub pcr_primers_str: String,
}

impl AnalysisParams {
    pub fn get(&self, role: LogicalInput) -> Option<&str> {
        match role {
            LogicalInput::RefSeq => Some(&self.ref_seq_str),
            LogicalInput::GeneMap => Some(&self.gene_map_str),
            LogicalInput::Tree => Some(&self.tree_str),
            LogicalInput::QcConfig => Some(&self.qc_config_str),
            LogicalInput::VirusProperties => Some(&self.virus_properties_str),
            LogicalInput::PcrPrimers => Some(&self.pcr_primers_str),
            LogicalInput::QrySeq => None,
        }
    }
}

// ============================================================================
// Analysis Events
// ============================================================================

/// Run-wide progress pushed by the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub enum AlgorithmGlobalStatus {
    #[default]
    Idle,
    LoadingData,
    InitWorkers,
    Started,
    BuildingTree,
    Done,
    Failed,
}

impl AlgorithmGlobalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlgorithmGlobalStatus::Done | AlgorithmGlobalStatus::Failed)
    }
}

/// One parsed record of the query fasta
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub struct FastaRecordId {
    pub index: usize,
    pub seq_name: String,
}

/// Per-record outcome. A failed record does not fail the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "status", rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum AnalysisOutcome {
    Success {
        #[ts(type = "unknown")]
        result: serde_json::Value,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub struct AnalysisResult {
    pub index: usize,
    pub seq_name: String,
    pub outcome: AnalysisOutcome,
}

impl AnalysisResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::Success { .. })
    }
}

/// The four event sequences produced by the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum StreamKind {
    GlobalStatus,
    ParsedFasta,
    AnalysisResults,
    Tree,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::GlobalStatus,
        StreamKind::ParsedFasta,
        StreamKind::AnalysisResults,
        StreamKind::Tree,
    ];

    pub fn slot(self) -> usize {
        match self {
            StreamKind::GlobalStatus => 0,
            StreamKind::ParsedFasta => 1,
            StreamKind::AnalysisResults => 2,
            StreamKind::Tree => 3,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::GlobalStatus => write!(f, "global_status"),
            StreamKind::ParsedFasta => write!(f, "parsed_fasta"),
            StreamKind::AnalysisResults => write!(f, "analysis_results"),
            StreamKind::Tree => write!(f, "tree"),
        }
    }
}

// ============================================================================
// Engine Wire Protocol
// ============================================================================

/// Operations the engine acknowledges
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum EngineOp {
    Init,
    Launch,
}

impl std::fmt::Display for EngineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineOp::Init => write!(f, "init"),
            EngineOp::Launch => write!(f, "launch"),
        }
    }
}

/// Launcher -> engine, one JSON object per line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum EngineCommand {
    Init {
        num_threads: usize,
        params: AnalysisParams,
    },
    Launch {
        qry_fasta_str: String,
    },
    Shutdown,
}

/// Engine -> launcher, one JSON object per line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "generated.ts")]
pub enum EngineEvent {
    Ack {
        op: EngineOp,
    },
    Nack {
        op: EngineOp,
        message: String,
    },
    GlobalStatus {
        status: AlgorithmGlobalStatus,
    },
    ParsedFasta {
        index: usize,
        seq_name: String,
    },
    AnalysisResult {
        index: usize,
        seq_name: String,
        outcome: AnalysisOutcome,
    },
    Tree {
        #[ts(type = "unknown")]
        tree: serde_json::Value,
    },
    StreamComplete {
        stream: StreamKind,
    },
    StreamError {
        stream: StreamKind,
        message: String,
    },
}

impl EngineEvent {
    /// Sequence this event belongs to. Acknowledgements belong to none.
    pub fn stream(&self) -> Option<StreamKind> {
        match self {
            EngineEvent::Ack { .. } | EngineEvent::Nack { .. } => None,
            EngineEvent::GlobalStatus { .. } => Some(StreamKind::GlobalStatus),
            EngineEvent::ParsedFasta { .. } => Some(StreamKind::ParsedFasta),
            EngineEvent::AnalysisResult { .. } => Some(StreamKind::AnalysisResults),
            EngineEvent::Tree { .. } => Some(StreamKind::Tree),
            EngineEvent::StreamComplete { stream } | EngineEvent::StreamError { stream, .. } => {
                Some(*stream)
            }
        }
    }
}

// ============================================================================
// UI State
// ============================================================================

/// One results-table row. Either half may arrive first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub struct AnalysisRow {
    pub index: usize,
    pub seq_name: Option<String>,
    pub result: Option<AnalysisOutcome>,
}

/// Application state folded from the callback stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "generated.ts")]
pub struct AnalysisSnapshot {
    pub run_id: Option<String>,
    pub status: AlgorithmGlobalStatus,
    pub rows: BTreeMap<usize, AnalysisRow>,
    pub num_parsed: usize,
    pub num_results: usize,
    pub num_failed_records: usize,
    /// Results whose parse event has not been seen yet
    pub results_awaiting_parse: usize,
    #[ts(type = "unknown")]
    pub tree: Option<serde_json::Value>,
    pub error: Option<String>,
    pub completed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AnalysisSnapshot {
    pub fn is_finished(&self) -> bool {
        self.completed || self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    #[test]
    fn test_every_param_role_has_a_dataset_file() {
        for role in LogicalInput::PARAMS {
            assert!(role.dataset_file_key().is_some(), "{role} has no dataset file");
            assert!(!role.is_mandatory());
        }
        assert_eq!(LogicalInput::QrySeq.dataset_file_key(), None);
        assert!(LogicalInput::QrySeq.is_mandatory());
    }

    #[test]
    fn test_dataset_file_mapping_is_one_to_one() {
        let keys: std::collections::HashSet<_> = LogicalInput::PARAMS
            .iter()
            .filter_map(|role| role.dataset_file_key())
            .collect();
        assert_eq!(keys.len(), LogicalInput::PARAMS.len());
    }

    #[test]
    fn test_dataset_files_deserialize_camel_case() {
        let files: DatasetFiles = serde_json::from_str(
            r#"{"reference":"/ref.fasta","geneMap":"/genemap.gff","virusPropertiesJson":"/vp.json"}"#,
        )
        .unwrap();
        assert_eq!(files.get(DatasetFileKey::Reference), Some("/ref.fasta"));
        assert_eq!(files.get(DatasetFileKey::GeneMap), Some("/genemap.gff"));
        assert_eq!(
            files.get(DatasetFileKey::VirusPropertiesJson),
            Some("/vp.json")
        );
        assert_eq!(files.get(DatasetFileKey::Primers), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AlgorithmGlobalStatus::Done.is_terminal());
        assert!(AlgorithmGlobalStatus::Failed.is_terminal());
        assert!(!AlgorithmGlobalStatus::Started.is_terminal());
        assert!(!AlgorithmGlobalStatus::BuildingTree.is_terminal());
        assert_eq!(
            serde_json::to_string(&AlgorithmGlobalStatus::BuildingTree).unwrap(),
            "\"buildingTree\""
        );
    }

    #[test]
    fn test_engine_event_wire_format() {
        let event: EngineEvent = serde_json::from_str(
            r#"{"type":"analysis_result","index":2,"seq_name":"s3","outcome":{"status":"error","message":"bad"}}"#,
        )
        .unwrap();
        assert_eq!(event.stream(), Some(StreamKind::AnalysisResults));
        assert_eq!(
            event,
            EngineEvent::AnalysisResult {
                index: 2,
                seq_name: "s3".to_string(),
                outcome: AnalysisOutcome::Error {
                    message: "bad".to_string()
                },
            }
        );

        let ack: EngineEvent = serde_json::from_str(r#"{"type":"ack","op":"init"}"#).unwrap();
        assert_eq!(ack.stream(), None);
    }

    #[test]
    fn test_engine_command_wire_format() {
        let json = serde_json::to_string(&EngineCommand::Launch {
            qry_fasta_str: ">a\nACGT\n".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"launch","qry_fasta_str":">a\nACGT\n"}"#);

        let json = serde_json::to_string(&EngineCommand::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn export_types() {
        let config = Config::default();
        LogicalInput::export(&config).unwrap();
        DatasetFileKey::export(&config).unwrap();
        DatasetFiles::export(&config).unwrap();
        DatasetFlat::export(&config).unwrap();
        AnalysisParams::export(&config).unwrap();
        AlgorithmGlobalStatus::export(&config).unwrap();
        FastaRecordId::export(&config).unwrap();
        AnalysisOutcome::export(&config).unwrap();
        AnalysisResult::export(&config).unwrap();
        StreamKind::export(&config).unwrap();
        EngineOp::export(&config).unwrap();
        EngineCommand::export(&config).unwrap();
        EngineEvent::export(&config).unwrap();
        AnalysisRow::export(&config).unwrap();
        AnalysisSnapshot::export(&config).unwrap();
    }

    #[test]
    fn test_bindings_stay_inside_export_dir() {
        let path = EngineEvent::output_path().expect("EngineEvent is exported");
        assert_eq!(path, std::path::Path::new("generated.ts"));
        assert!(path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_))));
        assert_eq!(AnalysisSnapshot::output_path(), Some(path));
    }
}
