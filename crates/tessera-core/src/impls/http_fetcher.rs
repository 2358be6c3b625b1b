//! HttpArchiveFetcher - file service からの archive download
//!
//! `GET {base}/v1/files/{key}/download`。key は 1 つの path segment として
//! percent-encode されます。

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

use crate::ports::{ArchiveFetcher, FetchError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HttpFetcherError {
    #[error("invalid file service base url '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpArchiveFetcher {
    pub fn new(base_url: &str) -> Result<Self, HttpFetcherError> {
        let invalid = |message: String| HttpFetcherError::InvalidBaseUrl {
            url: base_url.to_string(),
            message,
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("url cannot be a base".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    pub fn download_url(&self, archive_key: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "files", archive_key, "download"]);
        }
        url
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(&self, archive_key: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.download_url(archive_key);
        tracing::debug!(%url, "downloading archive");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(archive_key.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Transient(format!("HTTP {status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
