//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryJobStore / InMemoryLayerStore / InMemoryHistoryStore**: 開発用・テスト用の正本
//! - **InMemoryArchiveFetcher**: key → bytes の固定マップ
//! - **HttpArchiveFetcher**: file service からの download（reqwest）
//! - **Ogr2OgrConverter**: 外部 converter プロセス（tokio::process）
//! - **FsStyleStorage**: style document のファイルシステム保存
//! - **TracingNotifier**: 通知を tracing に出力
//!
//! # 本番用実装
//! PostgreSQL の store は別クレート `tessera-pg` に配置します。

pub mod fs_styles;
pub mod http_fetcher;
pub mod inmem_archive;
pub mod inmem_history;
pub mod inmem_jobs;
pub mod inmem_layers;
pub mod ogr2ogr;
pub mod tracing_notifier;

#[cfg(test)]
pub mod testing;

pub use self::fs_styles::FsStyleStorage;
pub use self::http_fetcher::{HttpArchiveFetcher, HttpFetcherError};
pub use self::inmem_archive::InMemoryArchiveFetcher;
pub use self::inmem_history::InMemoryHistoryStore;
pub use self::inmem_jobs::InMemoryJobStore;
pub use self::inmem_layers::InMemoryLayerStore;
pub use self::ogr2ogr::Ogr2OgrConverter;
pub use self::tracing_notifier::TracingNotifier;
