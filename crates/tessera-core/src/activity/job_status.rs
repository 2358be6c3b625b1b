//! UpdateJobStatus - Job status の遷移を永続化

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Activity, Handler};
use crate::domain::{ActivityError, JobOutcome, JobToken};
use crate::ports::{JobStore, JobStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJobStatus {
    pub job_token: JobToken,
    pub outcome: JobOutcome,
}

impl Activity for UpdateJobStatus {
    const TYPE: &'static str = "job.update_status.v1";
    type Output = ();
}

pub struct UpdateJobStatusHandler {
    store: Arc<dyn JobStore>,
}

impl UpdateJobStatusHandler {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler<UpdateJobStatus> for UpdateJobStatusHandler {
    async fn handle(&self, input: UpdateJobStatus) -> Result<(), ActivityError> {
        let status = input.outcome.status();
        match self.store.update_job(input.job_token, input.outcome).await {
            Ok(changed) => {
                tracing::info!(job_token = %input.job_token, %status, changed, "job status updated");
                Ok(())
            }
            Err(JobStoreError::InvalidTransition(t)) if t.from == t.to => Ok(()),
            Err(e @ (JobStoreError::InvalidTransition(_) | JobStoreError::NotFound(_))) => {
                Err(ActivityError::fatal(e.to_string()))
            }
            Err(e) => Err(ActivityError::retryable(format!(
                "failed to update job {} to {status}: {e}",
                input.job_token
            ))),
        }
    }
}
