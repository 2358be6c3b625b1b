//! Repository for the `jobs` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tessera_core::domain::{DbId, Job, JobOutcome, JobStatus, JobToken};
use tessera_core::ports::{JobStore, JobStoreError};

use crate::is_unique_violation;

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, token, status, error, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: DbId,
    token: String,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let token: JobToken = row
            .token
            .parse()
            .map_err(|e| JobStoreError::Backend(format!("job {}: {e}", row.id)))?;
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| JobStoreError::Backend(format!("job {token}: {e}")))?;
        Ok(Job {
            id: row.id,
            token,
            outcome: JobOutcome::from_parts(status, row.error),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Status names a job may move to `status` from, for the guarded update.
fn predecessor_names(status: JobStatus) -> Vec<String> {
    status
        .predecessors()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn backend(err: sqlx::Error) -> JobStoreError {
    JobStoreError::Backend(err.to_string())
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find(&self, token: JobToken) -> Result<Option<Job>, JobStoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE token = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(token.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Job::try_from).transpose()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn add_job(&self, token: JobToken, outcome: JobOutcome) -> Result<DbId, JobStoreError> {
        let id = sqlx::query_scalar::<_, DbId>(
            "INSERT INTO jobs (token, status, error) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(token.to_string())
        .bind(outcome.status().as_str())
        .bind(outcome.error())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(token)
            } else {
                backend(e)
            }
        })?;
        Ok(id)
    }

    async fn get_job_by_token(&self, token: JobToken) -> Result<Job, JobStoreError> {
        self.find(token).await?.ok_or(JobStoreError::NotFound(token))
    }

    async fn update_job(&self, token: JobToken, outcome: JobOutcome) -> Result<bool, JobStoreError> {
        let status = outcome.status();
        let updated = sqlx::query(
            "UPDATE jobs SET status = $2, error = $3, updated_at = NOW() \
             WHERE token = $1 AND status = ANY($4)",
        )
        .bind(token.to_string())
        .bind(status.as_str())
        .bind(outcome.error())
        .bind(predecessor_names(status))
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();
        if updated == 1 {
            return Ok(true);
        }

        // nothing changed: either already there, or not a legal move
        let current = self.get_job_by_token(token).await?;
        if current.outcome.check_transition(&outcome)? {
            return Err(JobStoreError::Backend(format!(
                "job {token} changed concurrently while moving to {status}"
            )));
        }
        Ok(false)
    }
}
