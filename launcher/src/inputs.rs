//! Input resolution
//!
//! Every logical input of a run is either supplied explicitly by the user
//! (an `AlgorithmInput`) or falls back to the matching default file of the
//! selected dataset. Parameter roles resolve concurrently; the first failure
//! aborts the whole phase.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use shared_types::{AnalysisParams, DatasetFlat, LogicalInput};

use crate::error::AnalysisError;
use crate::fetch::{fetch_raw_url, validate_url, DatasetFetcher, FetchError};

// ============================================================================
// Explicit Inputs
// ============================================================================

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum InputError {
    #[error("Failed to read '{name}': {message}")]
    Read { name: String, message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// A user-supplied content provider for one logical input
#[async_trait]
pub trait AlgorithmInput: Send + Sync {
    /// Human-readable origin (file name, URL, "pasted text")
    fn name(&self) -> String;

    async fn get_content(&self) -> Result<String, InputError>;
}

/// Content pasted or typed by the user
#[derive(Debug, Clone)]
pub struct AlgorithmInputString {
    name: String,
    content: String,
}

impl AlgorithmInputString {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            name: "Pasted sequences".to_string(),
            content: content.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl AlgorithmInput for AlgorithmInputString {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn get_content(&self) -> Result<String, InputError> {
        Ok(self.content.clone())
    }
}

/// A local file picked by the user
#[derive(Debug, Clone)]
pub struct AlgorithmInputFile {
    path: PathBuf,
}

impl AlgorithmInputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AlgorithmInput for AlgorithmInputFile {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    async fn get_content(&self) -> Result<String, InputError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| InputError::Read {
                name: self.path.display().to_string(),
                message: e.to_string(),
            })
    }
}

/// A remote file given by URL
#[derive(Debug, Clone)]
pub struct AlgorithmInputUrl {
    url: String,
    client: reqwest::Client,
}

impl AlgorithmInputUrl {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl AlgorithmInput for AlgorithmInputUrl {
    fn name(&self) -> String {
        self.url.clone()
    }

    async fn get_content(&self) -> Result<String, InputError> {
        let url = validate_url(Some(&self.url), None)?;
        Ok(fetch_raw_url(&self.client, url).await?)
    }
}

pub type InputSource = Option<Arc<dyn AlgorithmInput>>;

/// Explicit parameter inputs of a run. `None` means "use the dataset default".
#[derive(Clone, Default)]
pub struct LaunchAnalysisInputs {
    pub ref_seq: InputSource,
    pub gene_map: InputSource,
    pub tree: InputSource,
    pub qc_config: InputSource,
    pub virus_properties: InputSource,
    pub pcr_primers: InputSource,
}

impl LaunchAnalysisInputs {
    pub fn get(&self, role: LogicalInput) -> Option<&Arc<dyn AlgorithmInput>> {
        let source = match role {
            LogicalInput::RefSeq => &self.ref_seq,
            LogicalInput::GeneMap => &self.gene_map,
            LogicalInput::Tree => &self.tree,
            LogicalInput::QcConfig => &self.qc_config,
            LogicalInput::VirusProperties => &self.virus_properties,
            LogicalInput::PcrPrimers => &self.pcr_primers,
            LogicalInput::QrySeq => return None,
        };
        source.as_ref()
    }

    pub fn set(&mut self, role: LogicalInput, input: Arc<dyn AlgorithmInput>) {
        let slot = match role {
            LogicalInput::RefSeq => &mut self.ref_seq,
            LogicalInput::GeneMap => &mut self.gene_map,
            LogicalInput::Tree => &mut self.tree,
            LogicalInput::QcConfig => &mut self.qc_config,
            LogicalInput::VirusProperties => &mut self.virus_properties,
            LogicalInput::PcrPrimers => &mut self.pcr_primers,
            LogicalInput::QrySeq => {
                tracing::warn!("Query sequences are not a parameter input; ignoring");
                return;
            }
        };
        *slot = Some(input);
    }
}

impl std::fmt::Debug for LaunchAnalysisInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for role in LogicalInput::PARAMS {
            map.entry(&role, &self.get(role).map(|input| input.name()));
        }
        map.finish()
    }
}

// ============================================================================
// InputResolver
// ============================================================================

#[derive(Debug, Clone)]
pub struct InputResolver {
    fetcher: DatasetFetcher,
}

impl InputResolver {
    pub fn new(fetcher: DatasetFetcher) -> Self {
        Self { fetcher }
    }

    /// Query sequences have no dataset fallback.
    pub async fn resolve_query(&self, input: InputSource) -> Result<String, AnalysisError> {
        let role = LogicalInput::QrySeq;
        let Some(input) = input else {
            return Err(AnalysisError::InputUnavailable { role });
        };
        read_explicit(role, input.as_ref()).await
    }

    /// Explicit content if given, otherwise the dataset default file verbatim.
    pub async fn resolve(
        &self,
        role: LogicalInput,
        input: Option<&dyn AlgorithmInput>,
        dataset_default_url: Option<&str>,
    ) -> Result<String, AnalysisError> {
        if let Some(input) = input {
            return read_explicit(role, input).await;
        }

        if role.is_mandatory() {
            return Err(AnalysisError::InputUnavailable { role });
        }

        tracing::debug!(%role, url = ?dataset_default_url, "Using dataset default file");
        self.fetcher
            .fetch_raw(dataset_default_url)
            .await
            .map_err(|e| AnalysisError::ResolutionFailure {
                role,
                reason: e.to_string(),
            })
    }

    /// Resolves all parameter roles concurrently. No partial set is ever returned.
    pub async fn resolve_params(
        &self,
        inputs: &LaunchAnalysisInputs,
        dataset: &DatasetFlat,
    ) -> Result<AnalysisParams, AnalysisError> {
        let resolutions = LogicalInput::PARAMS.into_iter().map(|role| {
            let input = inputs.get(role).map(|input| input.as_ref());
            let default_url = role
                .dataset_file_key()
                .and_then(|key| dataset.files.get(key));
            async move {
                let content = self.resolve(role, input, default_url).await?;
                Ok::<_, AnalysisError>((role, content))
            }
        });

        let mut params = AnalysisParams::default();
        for (role, content) in try_join_all(resolutions).await? {
            let slot = match role {
                LogicalInput::RefSeq => &mut params.ref_seq_str,
                LogicalInput::GeneMap => &mut params.gene_map_str,
                LogicalInput::Tree => &mut params.tree_str,
                LogicalInput::QcConfig => &mut params.qc_config_str,
                LogicalInput::VirusProperties => &mut params.virus_properties_str,
                LogicalInput::PcrPrimers => &mut params.pcr_primers_str,
                LogicalInput::QrySeq => continue,
            };
            *slot = content;
        }

        tracing::info!(dataset = %dataset.name, "Resolved analysis parameters");
        Ok(params)
    }
}

async fn read_explicit(
    role: LogicalInput,
    input: &dyn AlgorithmInput,
) -> Result<String, AnalysisError> {
    tracing::debug!(%role, input = %input.name(), "Reading explicit input");
    input
        .get_content()
        .await
        .map_err(|e| AnalysisError::ResolutionFailure {
            role,
            reason: e.to_string(),
        })
}
