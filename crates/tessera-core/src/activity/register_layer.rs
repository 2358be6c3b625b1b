//! RegisterLayer - layer catalog への登録（look-up-before-create）
//!
//! 同じ layer name で何度呼ばれても同じ layer id を返します。
//! 並行登録で `Conflict` が返った場合は既存 row を読み直します。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Activity, Handler};
use crate::domain::{ActivityError, DbId, GeometryType, NewLayer, StyleFileRef};
use crate::ports::{LayerStore, LayerStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLayer {
    pub layer_name: String,
    pub geometry_type: GeometryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_file: Option<StyleFileRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredLayer {
    pub layer_id: DbId,
    /// `false` when the layer already existed.
    pub created: bool,
}

impl Activity for RegisterLayer {
    const TYPE: &'static str = "import.register_layer.v1";
    type Output = RegisteredLayer;
}

pub struct RegisterLayerHandler {
    store: Arc<dyn LayerStore>,
}

impl RegisterLayerHandler {
    pub fn new(store: Arc<dyn LayerStore>) -> Self {
        Self { store }
    }

    async fn existing(&self, name: &str) -> Result<Option<DbId>, ActivityError> {
        let layer = self
            .store
            .get_layer_by_name(name)
            .await
            .map_err(|e| store_error(name, e))?;
        Ok(layer.map(|l| l.id))
    }
}

fn store_error(name: &str, e: LayerStoreError) -> ActivityError {
    ActivityError::retryable(format!("failed to register layer {name}: {e}"))
}

#[async_trait]
impl Handler<RegisterLayer> for RegisterLayerHandler {
    async fn handle(&self, input: RegisterLayer) -> Result<RegisteredLayer, ActivityError> {
        let name = input.layer_name.as_str();
        if let Some(layer_id) = self.existing(name).await? {
            tracing::info!(layer = %name, layer_id, "layer already registered");
            return Ok(RegisteredLayer {
                layer_id,
                created: false,
            });
        }

        let default_style_id = match &input.style_file {
            Some(style) => {
                let id = self
                    .store
                    .create_style(style.path())
                    .await
                    .map_err(|e| store_error(name, e))?;
                tracing::info!(style_id = id, path = %style, "created style");
                Some(id)
            }
            None => None,
        };

        let created = self
            .store
            .create_layer(NewLayer {
                name: input.layer_name.clone(),
                geometry_type: input.geometry_type,
                default_style_id,
            })
            .await;

        match created {
            Ok(layer_id) => {
                tracing::info!(layer = %name, layer_id, "created layer");
                Ok(RegisteredLayer {
                    layer_id,
                    created: true,
                })
            }
            Err(LayerStoreError::Conflict(_)) => match self.existing(name).await? {
                Some(layer_id) => {
                    tracing::info!(layer = %name, layer_id, "layer registered concurrently");
                    Ok(RegisteredLayer {
                        layer_id,
                        created: false,
                    })
                }
                None => Err(ActivityError::retryable(format!(
                    "layer {name} reported as existing but could not be read"
                ))),
            },
            Err(e) => Err(store_error(name, e)),
        }
    }
}
