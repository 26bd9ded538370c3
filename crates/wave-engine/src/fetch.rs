use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::error::LoadError;
use crate::loader::AudioFetcher;

/// Fetches audio bytes over `http(s)://`, or from disk for `file://` URLs and
/// plain paths.
#[derive(Debug, Clone, Default)]
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl SourceFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::fetch(url, e))?;
        if !response.status().is_success() {
            return Err(LoadError::FetchStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(|e| LoadError::fetch(url, e))?;
        debug!("fetch: {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let path = local_path(url);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LoadError::fetch(url, e))?;
        debug!("fetch: {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }
}

#[async_trait]
impl AudioFetcher for SourceFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url).await
        } else {
            self.fetch_file(url).await
        }
    }
}

fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}
