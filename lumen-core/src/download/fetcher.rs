use std::{fmt, path::Path, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bytes_written: u64,
    pub etag: Option<String>,
}

/// Byte transport used by the download cache.
#[async_trait]
pub trait Downloader: Send + Sync + fmt::Debug {
    /// Writes the resource at `url` into `dest`, which already exists and is
    /// empty. Must return `Err(Cancelled)` soon after `cancel` fires.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome>;
}

/// Streams HTTP(S) responses straight to disk.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CacheError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let failed = |reason: String| CacheError::DownloadFailed {
            url: url.to_owned(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dest)
            .await?;
        let mut stream = response.bytes_stream();
        let mut bytes_written = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        log::debug!("download finished; url={}, bytes={}", url, bytes_written);
        Ok(DownloadOutcome {
            bytes_written,
            etag,
        })
    }
}
