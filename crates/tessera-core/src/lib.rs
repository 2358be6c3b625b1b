//! tessera-core
//!
//! Durable import-job pipeline: turns an uploaded shapefile archive into a
//! registered map layer.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, layer, event, state, errors, attempt）
//! - **ports**: 抽象化レイヤー（JobStore, LayerStore, ArchiveFetcher, GeodataConverter, HistoryStore, ...）
//! - **activity**: 型付き Activity API（Activity trait, Handler trait, ActivityRegistry）と各 activity
//! - **engine**: ローカルの durable execution engine（retry, replay, cancel）
//! - **workflow**: ImportLayerWorkflow（状態機械 + saga compensation）
//! - **scheduler**: ScheduleImport の入口
//! - **impls**: ports の実装（InMemory, HTTP, ogr2ogr, filesystem）

pub mod activity;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod scheduler;
pub mod workflow;

pub use config::Config;
pub use engine::{LocalEngine, LocalEngineBuilder, RunHandle, RunStatus};
pub use error::{EngineError, ScheduleError};
pub use scheduler::{ScheduledImport, Scheduler};
pub use workflow::{ImportLayerWorkflow, WorkflowOptions};
