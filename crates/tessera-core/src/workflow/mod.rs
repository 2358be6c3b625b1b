//! Workflow - import workflow の定義
//!
//! engine の [`Workflow`](crate::engine::Workflow) trait を実装し、
//! activity は [`WorkflowContext`](crate::engine::WorkflowContext) 経由でのみ呼び出します。

pub mod import_layer;
pub mod options;
pub mod saga;

pub use self::import_layer::ImportLayerWorkflow;
pub use self::options::{ActivityClass, WorkflowOptions};
pub use self::saga::{Compensation, Saga};
