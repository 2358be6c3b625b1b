//! Engine - ローカルの durable execution engine
//!
//! [`ExecutionSubstrate`](crate::ports::ExecutionSubstrate) の実装です。
//! workflow 定義（[`Workflow`]）は engine に依存せず、
//! [`WorkflowContext`] 経由でのみ activity を実行します。

pub mod context;
pub mod local;
pub mod retry;
pub mod workflow;

pub use self::context::WorkflowContext;
pub use self::local::{BuildError, DEFAULT_CONCURRENCY, DEFAULT_TASK_QUEUE, LocalEngine, LocalEngineBuilder};
pub use self::retry::{ActivityOptions, Decider, Decision, DefaultDecider, RetryPolicy};
pub use self::workflow::{DynWorkflow, Workflow};
pub use crate::ports::{RunHandle, RunStatus};
