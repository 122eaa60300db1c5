//! HTTP directory client.

use super::{CellId, DirectoryResolver};
use crate::config::{ClientConfig, DirectoryConfig};
use crate::endpoint::Endpoint;
use crate::{Result, TetherError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct DirectoryEnvelope {
    response: DirectoryResponse,
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    serverlist: Vec<String>,
    result: i32,
    #[serde(default)]
    message: String,
}

/// Fetches the server list from a web directory.
///
/// Issues `GET {base_url}?cellid={n}` and expects
/// `{"response": {"serverlist": ["ip:port", ...], "result": 1, "message": ""}}`.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: Url,
}

impl HttpDirectory {
    /// Directory at the default URL.
    pub fn new() -> Result<Self> {
        Self::with_url(DirectoryConfig::DEFAULT_URL)
    }

    pub fn with_url(base_url: &str) -> Result<Self> {
        Self::with_url_and_timeout(base_url, DirectoryConfig::REQUEST_TIMEOUT)
    }

    pub fn with_url_and_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| TetherError::Config {
            message: format!("Invalid directory URL {}: {}", base_url, e),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(TetherError::Config {
                message: format!("Directory URL must be http(s): {}", base_url),
            });
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ClientConfig::USER_AGENT)
            .build()
            .map_err(|e| TetherError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request_url(&self, cell_id: CellId) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("cellid", &cell_id.to_string());
        url
    }
}

#[async_trait]
impl DirectoryResolver for HttpDirectory {
    async fn resolve(&self, cell_id: CellId) -> Result<Vec<Endpoint>> {
        let url = self.request_url(cell_id);
        debug!("Requesting server list from {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TetherError::directory(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TetherError::directory(format!(
                "GET {} returned HTTP {}",
                url, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TetherError::directory(format!("Failed to read directory body: {}", e)))?;

        let endpoints = parse_server_list(&body)?;
        info!("Directory returned {} servers for cell {}", endpoints.len(), cell_id);
        Ok(endpoints)
    }
}

/// Parse a directory response body into endpoints.
///
/// Entries that are not valid `ip:port` strings are skipped with a warning.
pub(crate) fn parse_server_list(body: &[u8]) -> Result<Vec<Endpoint>> {
    let envelope: DirectoryEnvelope = serde_json::from_slice(body)
        .map_err(|e| TetherError::directory(format!("Malformed directory response: {}", e)))?;
    let response = envelope.response;

    if response.result != DirectoryConfig::RESULT_OK {
        return Err(TetherError::directory(format!(
            "Directory result {}: {}",
            response.result, response.message
        )));
    }

    let endpoints: Vec<Endpoint> = response
        .serverlist
        .iter()
        .filter_map(|entry| match entry.parse::<Endpoint>() {
            Ok(endpoint) => Some(endpoint),
            Err(_) => {
                warn!("Skipping unparsable directory entry {:?}", entry);
                None
            }
        })
        .collect();

    if endpoints.is_empty() {
        return Err(TetherError::directory("Directory returned no servers"));
    }
    Ok(endpoints)
}
