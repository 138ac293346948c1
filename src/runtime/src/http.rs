//! HTTP access to upstream release sources.

use async_trait::async_trait;
use bytes::Bytes;
use containerdisks_core::error::{DiskError, Result};
use futures::stream::{BoxStream, StreamExt};

/// A stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Fetches upstream release metadata and disk bodies.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Download a (small) document completely.
    async fn get_all(&self, url: &str) -> Result<Vec<u8>>;

    /// Open a download and return its body as a chunk stream.
    async fn get_stream(&self, url: &str) -> Result<ByteStream>;
}

/// `Getter` backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpGetter {
    client: reqwest::Client,
}

impl HttpGetter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(url, e))?;

        response
            .error_for_status()
            .map_err(|e| download_error(url, e))
    }
}

#[async_trait]
impl Getter for HttpGetter {
    async fn get_all(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "Fetching document");
        let body = self
            .send(url)
            .await?
            .bytes()
            .await
            .map_err(|e| download_error(url, e))?;
        Ok(body.to_vec())
    }

    async fn get_stream(&self, url: &str) -> Result<ByteStream> {
        tracing::debug!(url, "Opening download");
        let response = self.send(url).await?;
        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| download_error(&url, e)))
            .boxed())
    }
}

fn download_error(url: &str, err: reqwest::Error) -> DiskError {
    DiskError::DownloadError {
        url: url.to_string(),
        message: err.to_string(),
    }
}
