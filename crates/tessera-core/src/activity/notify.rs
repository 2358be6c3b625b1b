//! Notify - 完了 / 失敗の通知（best-effort）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Activity, Handler};
use crate::domain::{ActivityError, JobStatus, JobToken};
use crate::ports::{Clock, JobStore, JobStoreError, Notification, Notifier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notify {
    pub job_token: JobToken,
    pub status: JobStatus,
}

impl Activity for Notify {
    const TYPE: &'static str = "job.notify.v1";
    type Output = ();
}

pub struct NotifyHandler {
    jobs: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl NotifyHandler {
    pub fn new(jobs: Arc<dyn JobStore>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs,
            notifier,
            clock,
        }
    }
}

#[async_trait]
impl Handler<Notify> for NotifyHandler {
    async fn handle(&self, input: Notify) -> Result<(), ActivityError> {
        // the error message lives on the job record, not in the activity input
        let job = self
            .jobs
            .get_job_by_token(input.job_token)
            .await
            .map_err(|e| match e {
                JobStoreError::NotFound(_) => ActivityError::fatal(e.to_string()),
                other => ActivityError::retryable(other.to_string()),
            })?;

        let notification = Notification {
            job_token: input.job_token,
            status: input.status,
            error: job.error().map(str::to_string),
            at: self.clock.now(),
        };
        self.notifier
            .notify(&notification)
            .await
            .map_err(|e| ActivityError::retryable(e.to_string()))
    }
}
