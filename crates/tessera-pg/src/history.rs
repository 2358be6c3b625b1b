//! Repository for the `workflow_runs` / `workflow_steps` tables.
//!
//! state, status, step 結果と attempt / decision 履歴は JSONB に保存します。
//! lease の期限はすべて DB の `NOW()` 基準で判定します。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use tessera_core::domain::{AttemptRecord, DecisionRecord, WorkflowState};
use tessera_core::ports::{HistoryError, HistoryStore, RunRecord, RunStatus, StepRecord, StepResult};

use crate::{is_foreign_key_violation, is_unique_violation};

/// Column list for `workflow_runs` queries.
const RUN_COLUMNS: &str = "run_id, workflow_type, task_queue, input, state, status, created_at";

/// Column list for `workflow_steps` queries.
const STEP_COLUMNS: &str = "seq, activity, result, attempts, decisions";

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: String,
    workflow_type: String,
    task_queue: String,
    input: Json<serde_json::Value>,
    state: Json<WorkflowState>,
    status: Json<RunStatus>,
    created_at: DateTime<Utc>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        RunRecord {
            run_id: row.run_id,
            workflow_type: row.workflow_type,
            task_queue: row.task_queue,
            input: row.input.0,
            state: row.state.0,
            status: row.status.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StepRow {
    seq: i32,
    activity: String,
    result: Json<StepResult>,
    attempts: Json<Vec<AttemptRecord>>,
    decisions: Json<Vec<DecisionRecord>>,
}

impl TryFrom<StepRow> for StepRecord {
    type Error = HistoryError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        let seq = u32::try_from(row.seq)
            .map_err(|_| HistoryError::Backend(format!("negative step sequence {}", row.seq)))?;
        Ok(StepRecord {
            seq,
            activity: row.activity,
            result: row.result.0,
            attempts: row.attempts.0,
            decisions: row.decisions.0,
        })
    }
}

fn backend(err: sqlx::Error) -> HistoryError {
    HistoryError::Backend(err.to_string())
}

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn create_run(
        &self,
        run: &RunRecord,
        owner: &str,
        ttl: Duration,
    ) -> Result<(), HistoryError> {
        sqlx::query(
            "INSERT INTO workflow_runs \
             (run_id, workflow_type, task_queue, input, state, status, finished, created_at, \
              owner, lease_until) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW() + make_interval(secs => $10))",
        )
        .bind(&run.run_id)
        .bind(&run.workflow_type)
        .bind(&run.task_queue)
        .bind(Json(&run.input))
        .bind(Json(run.state))
        .bind(Json(&run.status))
        .bind(run.status.is_finished())
        .bind(run.created_at)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                HistoryError::AlreadyExists(run.run_id.clone())
            } else {
                backend(e)
            }
        })?;
        Ok(())
    }

    async fn claim_run(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<bool, HistoryError> {
        let claimed = sqlx::query(
            "UPDATE workflow_runs \
             SET owner = $2, lease_until = NOW() + make_interval(secs => $3), updated_at = NOW() \
             WHERE run_id = $1 AND NOT finished \
               AND (owner IS NULL OR owner = $2 OR lease_until <= NOW())",
        )
        .bind(run_id)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        Ok(claimed == 1)
    }

    async fn renew_lease(&self, run_id: &str, owner: &str, ttl: Duration) -> Result<bool, HistoryError> {
        let renewed = sqlx::query(
            "UPDATE workflow_runs SET lease_until = NOW() + make_interval(secs => $3) \
             WHERE run_id = $1 AND owner = $2 AND NOT finished",
        )
        .bind(run_id)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        Ok(renewed == 1)
    }

    async fn release_run(&self, run_id: &str, owner: &str) -> Result<(), HistoryError> {
        sqlx::query(
            "UPDATE workflow_runs SET owner = NULL, lease_until = NULL, updated_at = NOW() \
             WHERE run_id = $1 AND owner = $2",
        )
        .bind(run_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, HistoryError> {
        let query = format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE run_id = $1");
        let row = sqlx::query_as::<_, RunRow>(&query)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(RunRecord::from))
    }

    async fn record_state(&self, run_id: &str, state: WorkflowState) -> Result<(), HistoryError> {
        let updated = sqlx::query(
            "UPDATE workflow_runs SET state = $2, updated_at = NOW() WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(Json(state))
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        if updated == 0 {
            return Err(HistoryError::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    async fn record_step(&self, run_id: &str, step: &StepRecord) -> Result<(), HistoryError> {
        let seq = i32::try_from(step.seq)
            .map_err(|_| HistoryError::Backend(format!("step sequence {} out of range", step.seq)))?;
        sqlx::query(
            "INSERT INTO workflow_steps (run_id, seq, activity, result, attempts, decisions) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(run_id)
        .bind(seq)
        .bind(&step.activity)
        .bind(Json(&step.result))
        .bind(Json(&step.attempts))
        .bind(Json(&step.decisions))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                HistoryError::StepConflict {
                    run_id: run_id.to_string(),
                    seq: step.seq,
                }
            } else if is_foreign_key_violation(&e) {
                HistoryError::NotFound(run_id.to_string())
            } else {
                backend(e)
            }
        })?;
        Ok(())
    }

    async fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, HistoryError> {
        let query = format!("SELECT {STEP_COLUMNS} FROM workflow_steps WHERE run_id = $1 ORDER BY seq");
        let rows = sqlx::query_as::<_, StepRow>(&query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(StepRecord::try_from).collect()
    }

    async fn finish_run(&self, run_id: &str, status: &RunStatus) -> Result<(), HistoryError> {
        let updated = sqlx::query(
            "UPDATE workflow_runs SET status = $2, finished = $3, \
             owner = NULL, lease_until = NULL, updated_at = NOW() \
             WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(Json(status))
        .bind(status.is_finished())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        if updated == 0 {
            return Err(HistoryError::NotFound(run_id.to_string()));
        }
        tracing::debug!(run_id, ?status, "run finished");
        Ok(())
    }

    async fn unfinished_runs(&self) -> Result<Vec<RunRecord>, HistoryError> {
        let query = format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs \
             WHERE NOT finished \
             ORDER BY created_at, run_id"
        );
        let rows = sqlx::query_as::<_, RunRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(RunRecord::from).collect())
    }
}
