//! HistoryStore port - workflow run の checkpoint（正本）
//!
//! HistoryStore は以下を管理します：
//! - run（workflow type, input, 現在の WorkflowState, 終了状態）
//! - step（sequence 番号ごとの activity 結果、attempt / decision 履歴）
//!
//! # 設計原則
//! - step の結果は次の step が始まる前に記録される
//! - crash 後は記録済みの step を再実行せずに結果を返し、次の未完了 step から再開する
//! - すべての run の状態は HistoryStore から再構築可能
//!
//! # Lease
//! 未完了の run は 1 つの engine（owner）だけが実行します。owner は lease を
//! 定期的に延長し、期限切れ・解放済み・自分の lease の run だけを claim できます。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::{AttemptRecord, DecisionRecord, StepFailure, WorkflowState};

/// Terminal or in-flight status of a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed(String),
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_type: String,
    pub task_queue: String,
    pub input: serde_json::Value,
    pub state: WorkflowState,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum StepResult {
    Completed(serde_json::Value),
    Failed(StepFailure),
}

/// Durable result of one activity step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub seq: u32,
    pub activity: String,
    pub result: StepResult,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("run '{0}' already exists")]
    AlreadyExists(String),

    #[error("run '{0}' not found")]
    NotFound(String),

    #[error("step {seq} of run '{run_id}' already recorded")]
    StepConflict { run_id: String, seq: u32 },

    #[error("history backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert a run already leased to `owner` for `ttl`.
    async fn create_run(&self, run: &RunRecord, owner: &str, ttl: Duration)
    -> Result<(), HistoryError>;

    /// Take the lease on an unfinished run when it is free, expired or
    /// already held by `owner`. `false` while another owner holds it.
    async fn claim_run(&self, run_id: &str, owner: &str, ttl: Duration)
    -> Result<bool, HistoryError>;

    /// Extend the lease for another `ttl`; `false` once `owner` lost it.
    async fn renew_lease(&self, run_id: &str, owner: &str, ttl: Duration)
    -> Result<bool, HistoryError>;

    /// Give up the lease so that any engine may claim the run.
    async fn release_run(&self, run_id: &str, owner: &str) -> Result<(), HistoryError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError>;

    async fn record_state(&self, run_id: &str, state: WorkflowState) -> Result<(), HistoryError>;

    async fn record_step(&self, run_id: &str, step: &StepRecord) -> Result<(), HistoryError>;

    /// All recorded steps of a run, ordered by `seq`.
    async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, HistoryError>;

    async fn finish_run(&self, run_id: &str, status: &RunStatus) -> Result<(), HistoryError>;

    /// Runs that have not reached a terminal status, oldest first.
    async fn unfinished_runs(&self) -> Result<Vec<RunRecord>, HistoryError>;
}
