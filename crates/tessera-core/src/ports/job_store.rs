//! JobStore port - import job の正本（source of truth）
//!
//! # 設計原則
//! - 書き込みは単一行の atomic な操作（cross-step transaction は持たない）
//! - 状態遷移の検証は store 側でも行う（pending → processing → {completed | failed}）
//! - 同じ status の再書き込みは no-op（activity の再試行に耐える）

use async_trait::async_trait;

use crate::domain::{DbId, InvalidJobTransition, Job, JobOutcome, JobToken};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(JobToken),

    #[error("job {0} already exists")]
    AlreadyExists(JobToken),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidJobTransition),

    #[error("job store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job record with the given initial outcome; returns its surrogate id.
    async fn add_job(&self, token: JobToken, outcome: JobOutcome) -> Result<DbId, JobStoreError>;

    async fn get_job_by_token(&self, token: JobToken) -> Result<Job, JobStoreError>;

    /// Persist a status transition.
    ///
    /// Returns `true` when the row changed, `false` when the job already had
    /// the requested status.
    async fn update_job(&self, token: JobToken, outcome: JobOutcome) -> Result<bool, JobStoreError>;
}
