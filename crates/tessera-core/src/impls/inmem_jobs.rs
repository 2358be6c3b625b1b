//! InMemoryJobStore - 開発用・テスト用の JobStore
//!
//! tokio の Mutex で単一 HashMap を守ります。遷移の検証は
//! [`JobOutcome::check_transition`] に任せます。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::{DbId, Job, JobOutcome, JobStatus, JobToken};
use crate::ports::{Clock, JobStore, JobStoreError, SystemClock};

struct JobRow {
    job: Job,
    /// Every status the job has been in, in order.
    history: Vec<JobStatus>,
}

#[derive(Default)]
struct State {
    next_id: DbId,
    jobs: HashMap<JobToken, JobRow>,
}

pub struct InMemoryJobStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Statuses the job went through (for testing)
    #[cfg(test)]
    pub async fn status_history(&self, token: JobToken) -> Vec<JobStatus> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&token)
            .map(|row| row.history.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn add_job(&self, token: JobToken, outcome: JobOutcome) -> Result<DbId, JobStoreError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&token) {
            return Err(JobStoreError::AlreadyExists(token));
        }
        state.next_id += 1;
        let id = state.next_id;
        let now = self.clock.now();
        let status = outcome.status();
        state.jobs.insert(
            token,
            JobRow {
                job: Job {
                    id,
                    token,
                    outcome,
                    created_at: now,
                    updated_at: now,
                },
                history: vec![status],
            },
        );
        Ok(id)
    }

    async fn get_job_by_token(&self, token: JobToken) -> Result<Job, JobStoreError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&token)
            .map(|row| row.job.clone())
            .ok_or(JobStoreError::NotFound(token))
    }

    async fn update_job(&self, token: JobToken, outcome: JobOutcome) -> Result<bool, JobStoreError> {
        let mut state = self.state.lock().await;
        let row = state
            .jobs
            .get_mut(&token)
            .ok_or(JobStoreError::NotFound(token))?;
        if !row.job.outcome.check_transition(&outcome)? {
            return Ok(false);
        }
        row.history.push(outcome.status());
        row.job.outcome = outcome;
        row.job.updated_at = self.clock.now();
        Ok(true)
    }
}
