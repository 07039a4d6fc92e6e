use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::TileSource;
use crate::error::IoError;
use crate::stack::StackInfo;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP implementation of [`TileSource`].
///
/// Tiles and metadata are fetched with a shared `reqwest` client. A 404 maps
/// to [`IoError::NotFound`], any other non-success status to
/// [`IoError::Status`].
#[derive(Clone)]
pub struct HttpTileSource {
    client: Client,
}

impl HttpTileSource {
    /// Create a source whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, IoError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IoError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetch and parse the info document of a stack.
    ///
    /// `server` is the root URL of the server; a trailing slash is added if
    /// missing.
    pub async fn fetch_stack_info(
        &self,
        server: &Url,
        project_id: u64,
        stack_id: u64,
    ) -> Result<StackInfo, IoError> {
        let url = stack_info_url(server, project_id, stack_id)?;
        let body = self.fetch(url.as_str()).await?;

        serde_json::from_slice(&body).map_err(|e| IoError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, IoError> {
        debug!(url, "GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(IoError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| map_transport_error(url, e))
    }
}

/// URL of `{project_id}/stack/{stack_id}/info` below `server`.
pub fn stack_info_url(server: &Url, project_id: u64, stack_id: u64) -> Result<Url, IoError> {
    let mut base = server.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(&format!("{}/stack/{}/info", project_id, stack_id))
        .map_err(|e| IoError::InvalidUrl(e.to_string()))
}

fn map_transport_error(url: &str, e: reqwest::Error) -> IoError {
    if e.is_timeout() {
        IoError::Timeout(url.to_string())
    } else {
        IoError::Connection(format!("{}: {}", url, e))
    }
}
