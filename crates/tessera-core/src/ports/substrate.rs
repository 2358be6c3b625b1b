//! ExecutionSubstrate port - durable execution substrate への workflow 投入
//!
//! Scheduler はこの trait だけを通して workflow を開始します。

use async_trait::async_trait;
use tokio::sync::watch;

use super::history_store::RunStatus;

/// A request to start one workflow run.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub workflow_type: String,
    pub task_queue: String,
    pub run_id: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("no worker polls task queue '{0}'")]
    UnknownTaskQueue(String),

    #[error("workflow type '{0}' is not registered")]
    UnknownWorkflow(String),

    #[error("workflow run '{0}' already started")]
    AlreadyStarted(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("failed to record workflow run: {0}")]
    History(String),
}

/// Handle to a submitted run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: String,
    status: watch::Receiver<RunStatus>,
}

impl RunHandle {
    pub fn new(run_id: impl Into<String>, status: watch::Receiver<RunStatus>) -> Self {
        Self {
            run_id: run_id.into(),
            status,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current status without waiting.
    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait(mut self) -> RunStatus {
        match self.status.wait_for(RunStatus::is_finished).await {
            Ok(status) => status.clone(),
            Err(_) => RunStatus::Failed("run handle closed before the run finished".to_string()),
        }
    }
}

#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    async fn submit_workflow(&self, request: SubmitRequest) -> Result<RunHandle, SubmitError>;
}
