//! Repository for the `layers` / `styles` tables and the converter's data tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::path::Path;

use tessera_core::domain::{DbId, GeometryType, Layer, NewLayer};
use tessera_core::ports::{LayerStore, LayerStoreError, check_table_name};

use crate::is_unique_violation;

/// Column list for `layers` queries.
const COLUMNS: &str = "id, name, geometry_type, default_style_id, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct LayerRow {
    id: DbId,
    name: String,
    geometry_type: String,
    default_style_id: Option<DbId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LayerRow> for Layer {
    type Error = LayerStoreError;

    fn try_from(row: LayerRow) -> Result<Self, Self::Error> {
        let geometry_type: GeometryType = row
            .geometry_type
            .parse()
            .map_err(|e| LayerStoreError::Backend(format!("layer {}: {e}", row.name)))?;
        Ok(Layer {
            id: row.id,
            name: row.name,
            geometry_type,
            default_style_id: row.default_style_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Quote `name` as an SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn backend(err: sqlx::Error) -> LayerStoreError {
    LayerStoreError::Backend(err.to_string())
}

pub struct PgLayerStore {
    pool: PgPool,
}

impl PgLayerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LayerStore for PgLayerStore {
    async fn get_layer_by_name(&self, name: &str) -> Result<Option<Layer>, LayerStoreError> {
        let query = format!("SELECT {COLUMNS} FROM layers WHERE name = $1");
        let row = sqlx::query_as::<_, LayerRow>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Layer::try_from).transpose()
    }

    async fn create_layer(&self, layer: NewLayer) -> Result<DbId, LayerStoreError> {
        let id = sqlx::query_scalar::<_, DbId>(
            "INSERT INTO layers (name, geometry_type, default_style_id) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&layer.name)
        .bind(layer.geometry_type.as_str())
        .bind(layer.default_style_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LayerStoreError::Conflict(layer.name.clone())
            } else {
                backend(e)
            }
        })?;
        Ok(id)
    }

    async fn create_style(&self, file_path: &Path) -> Result<DbId, LayerStoreError> {
        let id = sqlx::query_scalar::<_, DbId>("INSERT INTO styles (file_path) VALUES ($1) RETURNING id")
            .bind(file_path.to_string_lossy().as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(id)
    }

    async fn drop_table(&self, name: &str) -> Result<bool, LayerStoreError> {
        check_table_name(name)?;
        let ident = quote_ident(name);

        let existed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_tables \
             WHERE schemaname = current_schema() AND tablename = $1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {ident}"))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        tracing::debug!(table = name, existed, "drop table if exists");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("parcels", "\"parcels\"")]
    #[case("Parcels 2024", "\"Parcels 2024\"")]
    #[case("a\"b", "\"a\"\"b\"")]
    #[case("x; DROP TABLE jobs", "\"x; DROP TABLE jobs\"")]
    fn identifiers_are_quoted(#[case] name: &str, #[case] quoted: &str) {
        assert_eq!(quote_ident(name), quoted);
    }

    #[test]
    fn row_converts_into_layer() {
        let now = Utc::now();
        let layer = Layer::try_from(LayerRow {
            id: 3,
            name: "parcels".into(),
            geometry_type: "MULTIPOLYGON".into(),
            default_style_id: Some(1),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
        assert_eq!(layer.geometry_type, GeometryType::MultiPolygon);
        assert_eq!(layer.default_style_id, Some(1));
    }

    #[test]
    fn unknown_geometry_type_is_a_backend_error() {
        let now = Utc::now();
        let err = Layer::try_from(LayerRow {
            id: 3,
            name: "parcels".into(),
            geometry_type: "CIRCLE".into(),
            default_style_id: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap_err();
        assert!(matches!(err, LayerStoreError::Backend(_)));
    }
}
