//! InMemoryLayerStore - 開発用・テスト用の LayerStore
//!
//! layer / style の catalog に加えて、converter が作る data table の有無も
//! 名前の集合として持ちます（DropTable の検証用）。

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::domain::{DbId, Layer, NewLayer, Style};
use crate::ports::{Clock, LayerStore, LayerStoreError, SystemClock, check_table_name};

#[derive(Default)]
struct State {
    next_id: DbId,
    layers: BTreeMap<String, Layer>,
    styles: Vec<Style>,
    tables: HashSet<String>,
    drop_calls: Vec<String>,
    hidden_lookups: u32,
    stall_lookups: bool,
    fail_creates: bool,
}

impl State {
    fn allocate_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

pub struct InMemoryLayerStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    stalled: Notify,
}

impl InMemoryLayerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            stalled: Notify::new(),
        }
    }

    pub async fn layers(&self) -> Vec<Layer> {
        self.state.lock().await.layers.values().cloned().collect()
    }

    pub async fn styles(&self) -> Vec<Style> {
        self.state.lock().await.styles.clone()
    }

    /// Record that a data table exists (what the converter would have created).
    pub async fn create_table(&self, name: &str) {
        self.state.lock().await.tables.insert(name.to_string());
    }

    pub async fn has_table(&self, name: &str) -> bool {
        self.state.lock().await.tables.contains(name)
    }

    /// Names passed to `drop_table`, in call order (for testing)
    #[cfg(test)]
    pub async fn drop_calls(&self) -> Vec<String> {
        self.state.lock().await.drop_calls.clone()
    }

    /// Make the next `get_layer_by_name` miss (for testing)
    #[cfg(test)]
    pub async fn hide_next_lookup(&self) {
        self.state.lock().await.hidden_lookups += 1;
    }

    /// Make every later `get_layer_by_name` hang (for testing)
    #[cfg(test)]
    pub async fn stall_lookups(&self) {
        self.state.lock().await.stall_lookups = true;
    }

    /// Wait until a lookup is hanging (for testing)
    #[cfg(test)]
    pub async fn lookup_stalled(&self) {
        self.stalled.notified().await;
    }

    /// Make `create_layer` / `create_style` fail with a backend error (for testing)
    #[cfg(test)]
    pub async fn fail_creates(&self, fail: bool) {
        self.state.lock().await.fail_creates = fail;
    }
}

impl Default for InMemoryLayerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LayerStore for InMemoryLayerStore {
    async fn get_layer_by_name(&self, name: &str) -> Result<Option<Layer>, LayerStoreError> {
        let mut state = self.state.lock().await;
        if state.stall_lookups {
            drop(state);
            self.stalled.notify_one();
            return std::future::pending().await;
        }
        if state.hidden_lookups > 0 {
            state.hidden_lookups -= 1;
            return Ok(None);
        }
        Ok(state.layers.get(name).cloned())
    }

    async fn create_layer(&self, layer: NewLayer) -> Result<DbId, LayerStoreError> {
        let mut state = self.state.lock().await;
        if state.fail_creates {
            return Err(LayerStoreError::Backend("layer insert failed".to_string()));
        }
        if state.layers.contains_key(&layer.name) {
            return Err(LayerStoreError::Conflict(layer.name));
        }
        if let Some(style_id) = layer.default_style_id
            && !state.styles.iter().any(|s| s.id == style_id)
        {
            return Err(LayerStoreError::Backend(format!(
                "style {style_id} does not exist"
            )));
        }
        let id = state.allocate_id();
        let now = self.clock.now();
        state.layers.insert(
            layer.name.clone(),
            Layer {
                id,
                name: layer.name,
                geometry_type: layer.geometry_type,
                default_style_id: layer.default_style_id,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn create_style(&self, file_path: &Path) -> Result<DbId, LayerStoreError> {
        let mut state = self.state.lock().await;
        if state.fail_creates {
            return Err(LayerStoreError::Backend("style insert failed".to_string()));
        }
        let id = state.allocate_id();
        let now = self.clock.now();
        state.styles.push(Style {
            id,
            file_path: file_path.to_string_lossy().into_owned(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn drop_table(&self, name: &str) -> Result<bool, LayerStoreError> {
        check_table_name(name)?;
        let mut state = self.state.lock().await;
        state.drop_calls.push(name.to_string());
        Ok(state.tables.remove(name))
    }
}
