//! InMemoryArchiveFetcher - key → bytes の固定マップ

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::ports::{ArchiveFetcher, FetchError};

#[derive(Default)]
pub struct InMemoryArchiveFetcher {
    archives: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryArchiveFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.archives.lock().await.insert(key.into(), bytes);
    }
}

#[async_trait]
impl ArchiveFetcher for InMemoryArchiveFetcher {
    async fn fetch(&self, archive_key: &str) -> Result<Vec<u8>, FetchError> {
        self.archives
            .lock()
            .await
            .get(archive_key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(archive_key.to_string()))
    }
}
