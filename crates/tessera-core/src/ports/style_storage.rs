//! StyleStorage port - style document（.sld）の永続化先
//!
//! import の一時 workspace は activity 終了時に削除されるため、
//! style document は先にここへコピーしておきます。
//! import が失敗した場合は compensation で削除されます。

use async_trait::async_trait;
use std::path::Path;

use crate::domain::StyleFileRef;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("style document {path}: {message}")]
pub struct StyleStorageError {
    pub path: String,
    pub message: String,
}

#[async_trait]
pub trait StyleStorage: Send + Sync {
    /// Copy the document at `source` into durable storage.
    async fn store(&self, source: &Path) -> Result<StyleFileRef, StyleStorageError>;

    /// Delete a stored document. `false` if it was already gone.
    async fn remove(&self, file: &StyleFileRef) -> Result<bool, StyleStorageError>;
}
