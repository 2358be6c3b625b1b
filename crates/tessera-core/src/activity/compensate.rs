//! Compensation activities - registration 失敗時に import の副作用を取り消す
//!
//! - [`CompensateDropTable`]: converter が作った table を削除
//! - [`CompensateRemoveStyle`]: style storage にコピーした .sld を削除
//!
//! どちらも対象がすでに無ければ成功扱いです。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Activity, Handler};
use crate::domain::{ActivityError, StyleFileRef};
use crate::ports::{LayerStore, LayerStoreError, StyleStorage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensateDropTable {
    pub layer_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTableOutput {
    /// Whether a table existed and was dropped.
    pub dropped: bool,
}

impl Activity for CompensateDropTable {
    const TYPE: &'static str = "import.drop_table.v1";
    type Output = DropTableOutput;
}

pub struct DropTableHandler {
    store: Arc<dyn LayerStore>,
}

impl DropTableHandler {
    pub fn new(store: Arc<dyn LayerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler<CompensateDropTable> for DropTableHandler {
    async fn handle(&self, input: CompensateDropTable) -> Result<DropTableOutput, ActivityError> {
        match self.store.drop_table(&input.layer_name).await {
            Ok(dropped) => {
                tracing::info!(layer = %input.layer_name, dropped, "compensation: drop table");
                Ok(DropTableOutput { dropped })
            }
            Err(e @ LayerStoreError::InvalidTableName(_)) => Err(ActivityError::fatal(e.to_string())),
            Err(e) => Err(ActivityError::retryable(format!(
                "failed to drop table {}: {e}",
                input.layer_name
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensateRemoveStyle {
    pub style_file: StyleFileRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveStyleOutput {
    /// Whether the document existed and was removed.
    pub removed: bool,
}

impl Activity for CompensateRemoveStyle {
    const TYPE: &'static str = "import.remove_style_file.v1";
    type Output = RemoveStyleOutput;
}

pub struct RemoveStyleHandler {
    storage: Arc<dyn StyleStorage>,
}

impl RemoveStyleHandler {
    pub fn new(storage: Arc<dyn StyleStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Handler<CompensateRemoveStyle> for RemoveStyleHandler {
    async fn handle(&self, input: CompensateRemoveStyle) -> Result<RemoveStyleOutput, ActivityError> {
        let removed = self
            .storage
            .remove(&input.style_file)
            .await
            .map_err(|e| ActivityError::retryable(e.to_string()))?;
        tracing::info!(style_file = %input.style_file, removed, "compensation: remove style file");
        Ok(RemoveStyleOutput { removed })
    }
}
