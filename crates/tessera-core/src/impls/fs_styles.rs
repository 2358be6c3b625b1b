//! FsStyleStorage - style document を `dir/style_<ulid>.sld` にコピー
//!
//! 削除は `dir` 直下のファイルに限ります。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::StyleFileRef;
use crate::ports::{IdGenerator, StyleStorage, StyleStorageError, SystemClock, UlidGenerator};

pub struct FsStyleStorage {
    dir: PathBuf,
    ids: Arc<dyn IdGenerator>,
}

impl FsStyleStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_id_generator(dir, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(dir: impl Into<PathBuf>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            dir: dir.into(),
            ids,
        }
    }
}

#[async_trait]
impl StyleStorage for FsStyleStorage {
    async fn store(&self, source: &Path) -> Result<StyleFileRef, StyleStorageError> {
        let err = |message: String| StyleStorageError {
            path: source.display().to_string(),
            message,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| err(format!("create {}: {e}", self.dir.display())))?;

        let target = self
            .dir
            .join(format!("{}.sld", self.ids.generate_style_key()));
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| err(format!("store failed: {e}")))?;
        Ok(StyleFileRef::new(target))
    }

    async fn remove(&self, file: &StyleFileRef) -> Result<bool, StyleStorageError> {
        let err = |message: String| StyleStorageError {
            path: file.to_string(),
            message,
        };
        if file.path().parent() != Some(self.dir.as_path()) {
            return Err(err(format!("not inside {}", self.dir.display())));
        }
        match tokio::fs::remove_file(file.path()).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(err(format!("remove failed: {e}"))),
        }
    }
}
