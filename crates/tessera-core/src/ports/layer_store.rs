//! LayerStore port - layer / style catalog と layer table の管理

use async_trait::async_trait;
use std::path::Path;

use crate::domain::{DbId, Layer, NewLayer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerStoreError {
    /// A layer with the same name was created concurrently.
    #[error("layer '{0}' already exists")]
    Conflict(String),

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("layer store backend error: {0}")]
    Backend(String),
}

/// Longest identifier PostgreSQL keeps without truncation.
pub const MAX_TABLE_NAME_LEN: usize = 63;

/// Table name the converter actually creates for `name`.
///
/// ogr2ogr launders layer names: lower case, anything outside `[a-z0-9_]`
/// becomes `_`, cut at [`MAX_TABLE_NAME_LEN`].
pub fn launder_table_name(name: &str) -> String {
    let mut laundered: String = name
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect();
    laundered.truncate(MAX_TABLE_NAME_LEN);
    laundered
}

/// Reject names that cannot be used as a (quoted) table identifier.
pub fn check_table_name(name: &str) -> Result<(), LayerStoreError> {
    if name.is_empty() || name.len() > MAX_TABLE_NAME_LEN || name.contains('\0') {
        return Err(LayerStoreError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
pub trait LayerStore: Send + Sync {
    async fn get_layer_by_name(&self, name: &str) -> Result<Option<Layer>, LayerStoreError>;

    /// Insert a layer row. Name uniqueness is enforced here (`Conflict`).
    async fn create_layer(&self, layer: NewLayer) -> Result<DbId, LayerStoreError>;

    async fn create_style(&self, file_path: &Path) -> Result<DbId, LayerStoreError>;

    /// Drop the data table of a layer if it exists. A missing table is not an
    /// error; returns whether a table was dropped.
    async fn drop_table(&self, name: &str) -> Result<bool, LayerStoreError>;
}
