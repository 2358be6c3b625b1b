//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（PostgreSQL, file service, ogr2ogr, substrate など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod archive_fetcher;
pub mod clock;
pub mod converter;
pub mod history_store;
pub mod id_generator;
pub mod job_store;
pub mod layer_store;
pub mod notifier;
pub mod style_storage;
pub mod substrate;

pub use self::archive_fetcher::{ArchiveFetcher, FetchError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::converter::{ConvertError, ConvertRequest, GeodataConverter};
pub use self::history_store::{
    HistoryError, HistoryStore, RunRecord, RunStatus, StepRecord, StepResult,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{JobStore, JobStoreError};
pub use self::layer_store::{LayerStore, LayerStoreError, check_table_name, launder_table_name};
pub use self::notifier::{Notification, Notifier, NotifyError};
pub use self::style_storage::{StyleStorage, StyleStorageError};
pub use self::substrate::{ExecutionSubstrate, RunHandle, SubmitError, SubmitRequest};
