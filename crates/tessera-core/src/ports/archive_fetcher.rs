//! ArchiveFetcher port - アップロード済み archive の取得
//!
//! 具体的な transport（file service からの HTTP download）は impls 側。

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("archive '{0}' not found")]
    NotFound(String),

    #[error("transient error fetching archive: {0}")]
    Transient(String),
}

#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, archive_key: &str) -> Result<Vec<u8>, FetchError>;
}
