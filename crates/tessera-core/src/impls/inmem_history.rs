//! InMemoryHistoryStore - 開発用・テスト用の HistoryStore
//!
//! プロセス内にしか残らないため、crash をまたぐ resume は
//! 同じインスタンスを共有するテストでのみ再現できます。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::WorkflowState;
use crate::ports::{HistoryError, HistoryStore, RunRecord, RunStatus, StepRecord};

struct RunEntry {
    run: RunRecord,
    /// Insertion order, used to list unfinished runs oldest first.
    order: u64,
    states: Vec<WorkflowState>,
    steps: BTreeMap<u32, StepRecord>,
    owner: Option<String>,
    lease_until: Option<DateTime<Utc>>,
}

impl RunEntry {
    fn lease(&mut self, owner: &str, ttl: Duration) {
        self.owner = Some(owner.to_string());
        self.lease_until = Some(deadline(ttl));
    }

    fn claimable_by(&self, owner: &str) -> bool {
        if self.run.status.is_finished() {
            return false;
        }
        match (&self.owner, self.lease_until) {
            (None, _) => true,
            (Some(current), _) if current == owner => true,
            (Some(_), Some(until)) => until <= Utc::now(),
            (Some(_), None) => true,
        }
    }
}

fn deadline(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Default)]
struct State {
    next_order: u64,
    runs: HashMap<String, RunEntry>,
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    state: Mutex<State>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state the run was moved into, in order (for testing)
    #[cfg(test)]
    pub async fn states(&self, run_id: &str) -> Vec<WorkflowState> {
        let state = self.state.lock().await;
        state
            .runs
            .get(run_id)
            .map(|e| e.states.clone())
            .unwrap_or_default()
    }

    /// Current lease holder of a run (for testing)
    #[cfg(test)]
    pub async fn owner(&self, run_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.runs.get(run_id).and_then(|e| e.owner.clone())
    }

    /// Let the lease of a run run out, as if its owner had stopped renewing
    #[cfg(test)]
    pub async fn expire_lease(&self, run_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.runs.get_mut(run_id) {
            entry.lease_until = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }
}

fn not_found(run_id: &str) -> HistoryError {
    HistoryError::NotFound(run_id.to_string())
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_run(
        &self,
        run: &RunRecord,
        owner: &str,
        ttl: Duration,
    ) -> Result<(), HistoryError> {
        let mut state = self.state.lock().await;
        if state.runs.contains_key(&run.run_id) {
            return Err(HistoryError::AlreadyExists(run.run_id.clone()));
        }
        state.next_order += 1;
        let order = state.next_order;
        state.runs.insert(
            run.run_id.clone(),
            RunEntry {
                run: run.clone(),
                order,
                states: vec![run.state],
                steps: BTreeMap::new(),
                owner: Some(owner.to_string()),
                lease_until: Some(deadline(ttl)),
            },
        );
        Ok(())
    }

    async fn claim_run(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<bool, HistoryError> {
        let mut state = self.state.lock().await;
        let entry = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        if !entry.claimable_by(owner) {
            return Ok(false);
        }
        entry.lease(owner, ttl);
        Ok(true)
    }

    async fn renew_lease(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<bool, HistoryError> {
        let mut state = self.state.lock().await;
        let entry = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        if entry.run.status.is_finished() || entry.owner.as_deref() != Some(owner) {
            return Ok(false);
        }
        entry.lease(owner, ttl);
        Ok(true)
    }

    async fn release_run(&self, run_id: &str, owner: &str) -> Result<(), HistoryError> {
        let mut state = self.state.lock().await;
        let entry = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        if entry.owner.as_deref() == Some(owner) {
            entry.owner = None;
            entry.lease_until = None;
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError> {
        let state = self.state.lock().await;
        Ok(state.runs.get(run_id).map(|e| e.run.clone()))
    }

    async fn record_state(&self, run_id: &str, next: WorkflowState) -> Result<(), HistoryError> {
        let mut state = self.state.lock().await;
        let entry = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        entry.run.state = next;
        entry.states.push(next);
        Ok(())
    }

    async fn record_step(&self, run_id: &str, step: &StepRecord) -> Result<(), HistoryError> {
        let mut state = self.state.lock().await;
        let entry = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        if entry.steps.contains_key(&step.seq) {
            return Err(HistoryError::StepConflict {
                run_id: run_id.to_string(),
                seq: step.seq,
            });
        }
        entry.steps.insert(step.seq, step.clone());
        Ok(())
    }

    async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, HistoryError> {
        let state = self.state.lock().await;
        let entry = state.runs.get(run_id).ok_or_else(|| not_found(run_id))?;
        Ok(entry.steps.values().cloned().collect())
    }

    async fn finish_run(&self, run_id: &str, status: &RunStatus) -> Result<(), HistoryError> {
        let mut state = self.state.lock().await;
        let entry = state.runs.get_mut(run_id).ok_or_else(|| not_found(run_id))?;
        entry.run.status = status.clone();
        entry.owner = None;
        entry.lease_until = None;
        Ok(())
    }

    async fn unfinished_runs(&self) -> Result<Vec<RunRecord>, HistoryError> {
        let state = self.state.lock().await;
        let mut entries: Vec<&RunEntry> = state
            .runs
            .values()
            .filter(|e| !e.run.status.is_finished())
            .collect();
        entries.sort_by_key(|e| e.order);
        Ok(entries.into_iter().map(|e| e.run.clone()).collect())
    }
}
