//! tessera-pg
//!
//! PostgreSQL 実装（sqlx）: JobStore, LayerStore, HistoryStore
//!
//! # 使用例
//! ```ignore
//! let pool = tessera_pg::connect(&config.database_url, 10).await?;
//! tessera_pg::MIGRATOR.run(&pool).await?;
//! let jobs = PgJobStore::new(pool.clone());
//! ```

pub mod history;
pub mod jobs;
pub mod layers;

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

pub use history::PgHistoryStore;
pub use jobs::PgJobStore;
pub use layers::PgLayerStore;

/// Schema migrations embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// PostgreSQL unique constraint violation: error code 23505
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// PostgreSQL foreign key violation: error code 23503
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}
