//! Raw HTTP(S) downloads of dataset files
//!
//! Dataset files are fetched as plain text and handed to the engine verbatim.
//! Relative URLs are resolved against the configured dataset server.

use std::time::Duration;

use url::Url;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("Attempted to fetch from an empty URL")]
    EmptyUrl,

    #[error("Attempted to fetch from an invalid URL: '{0}'")]
    InvalidUrl(String),

    #[error("Request to URL \"{url}\" failed with status {status} {status_text}")]
    HttpStatus {
        url: String,
        status: u16,
        status_text: String,
    },

    #[error("Request to URL \"{url}\" failed: {message}")]
    Transport { url: String, message: String },

    #[error("Unable to fetch: request to URL \"{url}\" resulted in no data")]
    NoData { url: String },
}

/// HTTP client for dataset files, bound to one dataset server
#[derive(Debug, Clone)]
pub struct DatasetFetcher {
    client: reqwest::Client,
    dataset_server_url: Option<Url>,
}

impl DatasetFetcher {
    pub fn new(dataset_server_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let dataset_server_url = Url::parse(dataset_server_url)
            .map_err(|e| anyhow::anyhow!("Invalid dataset server URL '{dataset_server_url}': {e}"))?;
        Ok(Self {
            client,
            dataset_server_url: Some(dataset_server_url),
        })
    }

    /// Fetcher that only accepts absolute URLs
    pub fn without_server(client: reqwest::Client) -> Self {
        Self {
            client,
            dataset_server_url: None,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn validate_url(&self, url: Option<&str>) -> Result<Url, FetchError> {
        validate_url(url, self.dataset_server_url.as_ref())
    }

    /// GET `url` and return the body as text, without any transformation
    pub async fn fetch_raw(&self, url: Option<&str>) -> Result<String, FetchError> {
        let url = self.validate_url(url)?;
        fetch_raw_url(&self.client, url).await
    }
}

/// Checks that `url` is present and http(s), joining relative paths onto `base`.
pub fn validate_url(url: Option<&str>, base: Option<&Url>) -> Result<Url, FetchError> {
    let raw = url.map(str::trim).filter(|u| !u.is_empty());
    let Some(raw) = raw else {
        return Err(FetchError::EmptyUrl);
    };

    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| FetchError::InvalidUrl(raw.to_string()))?;
            join_relative(base, raw).ok_or_else(|| FetchError::InvalidUrl(raw.to_string()))?
        }
        Err(_) => return Err(FetchError::InvalidUrl(raw.to_string())),
    };

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(raw.to_string())),
    }
}

// Leading '/' means "below the dataset server root", not "host root".
fn join_relative(base: &Url, path: &str) -> Option<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path_with_slash = format!("{}/", base.path());
        base.set_path(&path_with_slash);
    }
    base.join(path.trim_start_matches('/')).ok()
}

pub(crate) async fn fetch_raw_url(client: &reqwest::Client, url: Url) -> Result<String, FetchError> {
    let url_str = url.to_string();
    tracing::debug!(url = %url_str, "Fetching raw file");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Transport {
            url: url_str.clone(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url = %url_str, status = status.as_u16(), "Fetch returned error status");
        return Err(FetchError::HttpStatus {
            url: url_str,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
        });
    }

    let body = response.text().await.map_err(|e| FetchError::Transport {
        url: url_str.clone(),
        message: e.to_string(),
    })?;

    if body.is_empty() {
        return Err(FetchError::NoData { url: url_str });
    }

    Ok(body)
}
