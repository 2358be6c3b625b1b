//! FetchAndConvert - archive の取得、展開、converter の実行
//!
//! # フロー
//! 1. activity 専用の一時 workspace を作成（attempt ごとに新規）
//! 2. ArchiveFetcher で archive を取得し、メモリ上から workspace に展開
//! 3. 最初の `.shp`（と任意の `.sld`）を探す
//! 4. GeodataConverter で `<shp の basename を launder した名前>` table に読み込む
//! 5. `.sld` があれば StyleStorage にコピー（workspace は最後に消えるため）
//!
//! table 名は converter と同じ規則で launder するので、registration と
//! compensation は実際に作られた table を参照します。
//!
//! workspace は `TempDir` の drop で成功・失敗・cancel のどの経路でも削除されます。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::{Activity, Handler};
use crate::domain::{ActivityError, GeometryType, StyleFileRef};
use crate::ports::{
    ArchiveFetcher, ConvertError, ConvertRequest, FetchError, GeodataConverter, StyleStorage,
    launder_table_name,
};

const GEOMETRY_EXTENSION: &str = "shp";
const STYLE_EXTENSION: &str = "sld";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAndConvert {
    pub archive_key: String,
}

/// Result of a successful import: the table the converter loaded and the
/// persisted style document, if the archive had one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedLayer {
    pub layer_name: String,
    pub geometry_type: GeometryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_file: Option<StyleFileRef>,
}

impl Activity for FetchAndConvert {
    const TYPE: &'static str = "import.fetch_and_convert.v1";
    type Output = ImportedLayer;
}

/// Fixed converter target for every import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterSettings {
    /// Target database connection handed to the converter.
    pub connection: String,
    pub geometry_type: GeometryType,
    /// Parent directory of the per-attempt workspaces; system temp dir when `None`.
    pub workspace_root: Option<PathBuf>,
}

pub struct FetchAndConvertHandler {
    fetcher: Arc<dyn ArchiveFetcher>,
    converter: Arc<dyn GeodataConverter>,
    styles: Arc<dyn StyleStorage>,
    settings: ConverterSettings,
}

impl FetchAndConvertHandler {
    pub fn new(
        fetcher: Arc<dyn ArchiveFetcher>,
        converter: Arc<dyn GeodataConverter>,
        styles: Arc<dyn StyleStorage>,
        settings: ConverterSettings,
    ) -> Self {
        Self {
            fetcher,
            converter,
            styles,
            settings,
        }
    }

    fn create_workspace(&self) -> Result<tempfile::TempDir, ActivityError> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("shapefile-");
            b
        };
        let dir = match &self.settings.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| ActivityError::retryable(format!("failed to create temporary directory: {e}")))
    }
}

#[async_trait]
impl Handler<FetchAndConvert> for FetchAndConvertHandler {
    async fn handle(&self, input: FetchAndConvert) -> Result<ImportedLayer, ActivityError> {
        let workspace = self.create_workspace()?;
        tracing::debug!(workspace = %workspace.path().display(), "created import workspace");

        let data = self.fetcher.fetch(&input.archive_key).await.map_err(|e| match e {
            FetchError::NotFound(_) => ActivityError::fatal(e.to_string()),
            FetchError::Transient(_) => ActivityError::retryable(format!(
                "failed to download {}: {e}",
                input.archive_key
            )),
        })?;

        let extract_dir = workspace.path().join("extracted");
        extract_archive(data, extract_dir.clone()).await?;
        tracing::debug!(dir = %extract_dir.display(), "unzipped archive");

        let found = locate_files(&extract_dir)?;
        let Some(geometry_file) = found.geometry else {
            return Err(ActivityError::fatal(format!(
                "no geometry file found in archive {}",
                input.archive_key
            )));
        };
        let layer_name = layer_name_for(&geometry_file)?;
        tracing::info!(file = %geometry_file.display(), layer = %layer_name, "found shapefile");

        let request = ConvertRequest {
            source: geometry_file,
            connection: self.settings.connection.clone(),
            table: layer_name.clone(),
            geometry_type: self.settings.geometry_type,
        };
        self.converter.convert(&request).await.map_err(|e| match e {
            ConvertError::Launch { .. } => ActivityError::fatal(e.to_string()),
            ConvertError::Failed { .. } => ActivityError::retryable(e.to_string()),
        })?;

        let style_file = match found.style {
            Some(path) => {
                let stored = self
                    .styles
                    .store(&path)
                    .await
                    .map_err(|e| ActivityError::retryable(e.to_string()))?;
                tracing::info!(style = %stored, "persisted style document");
                Some(stored)
            }
            None => None,
        };

        if let Err(e) = workspace.close() {
            tracing::warn!(error = %e, "failed to remove import workspace");
        }

        Ok(ImportedLayer {
            layer_name,
            geometry_type: self.settings.geometry_type,
            style_file,
        })
    }
}

async fn extract_archive(data: Vec<u8>, target: PathBuf) -> Result<(), ActivityError> {
    tokio::task::spawn_blocking(move || {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|e| ActivityError::fatal(format!("failed to open archive: {e}")))?;
        archive
            .extract(&target)
            .map_err(|e| ActivityError::fatal(format!("failed to unzip archive: {e}")))
    })
    .await
    .map_err(|e| ActivityError::retryable(format!("unzip task failed: {e}")))?
}

#[derive(Debug, Default)]
struct FoundFiles {
    geometry: Option<PathBuf>,
    style: Option<PathBuf>,
}

/// First `.shp` and first `.sld` in file-name order.
fn locate_files(dir: &Path) -> Result<FoundFiles, ActivityError> {
    let mut found = FoundFiles::default();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry
            .map_err(|e| ActivityError::retryable(format!("failed to scan extracted files: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some(GEOMETRY_EXTENSION) if found.geometry.is_none() => {
                found.geometry = Some(entry.into_path())
            }
            Some(STYLE_EXTENSION) if found.style.is_none() => found.style = Some(entry.into_path()),
            _ => {}
        }
    }
    Ok(found)
}

/// Laundered base name of the geometry file.
fn layer_name_for(geometry_file: &Path) -> Result<String, ActivityError> {
    geometry_file
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(launder_table_name)
        .ok_or_else(|| {
            ActivityError::fatal(format!(
                "cannot derive a layer name from {}",
                geometry_file.display()
            ))
        })
}
