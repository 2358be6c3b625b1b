//! Scheduler - import の受付
//!
//! Job を pending で作成してから workflow を投入します。
//! 投入に失敗した job は failed にして、pending のまま残しません。

use std::sync::Arc;

use crate::domain::{ImportEvent, Job, JobOutcome, JobToken};
use crate::engine::Workflow;
use crate::error::ScheduleError;
use crate::ports::{ExecutionSubstrate, IdGenerator, JobStore, RunHandle, SubmitRequest};
use crate::workflow::ImportLayerWorkflow;

/// A scheduled import: the job token and a handle on its workflow run.
#[derive(Debug, Clone)]
pub struct ScheduledImport {
    pub token: JobToken,
    pub run: RunHandle,
}

pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    substrate: Arc<dyn ExecutionSubstrate>,
    ids: Arc<dyn IdGenerator>,
    task_queue: String,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        substrate: Arc<dyn ExecutionSubstrate>,
        ids: Arc<dyn IdGenerator>,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            substrate,
            ids,
            task_queue: task_queue.into(),
        }
    }

    /// Create a pending job for `archive_key` and start its import workflow.
    ///
    /// The job token doubles as the workflow run id.
    pub async fn schedule_import(&self, archive_key: &str) -> Result<ScheduledImport, ScheduleError> {
        if archive_key.trim().is_empty() {
            return Err(ScheduleError::EmptyArchiveKey);
        }

        let token = self.ids.generate_job_token();
        let event = ImportEvent {
            job_token: token,
            archive_key: archive_key.to_string(),
        };
        let input = serde_json::to_value(&event).map_err(ScheduleError::Encode)?;

        self.jobs
            .add_job(token, JobOutcome::Pending)
            .await
            .map_err(ScheduleError::CreateJob)?;

        let request = SubmitRequest {
            workflow_type: ImportLayerWorkflow::TYPE.to_string(),
            task_queue: self.task_queue.clone(),
            run_id: token.to_string(),
            input,
        };
        match self.substrate.submit_workflow(request).await {
            Ok(run) => {
                tracing::info!(job_token = %token, archive_key, "import scheduled");
                Ok(ScheduledImport { token, run })
            }
            Err(source) => {
                tracing::error!(job_token = %token, error = %source, "failed to start import workflow");
                let outcome = JobOutcome::failed(format!("failed to start workflow: {source}"));
                if let Err(e) = self.jobs.update_job(token, outcome).await {
                    tracing::error!(job_token = %token, error = %e, "failed to mark unscheduled job as failed");
                }
                Err(ScheduleError::Submit { token, source })
            }
        }
    }

    /// Current state of a job, for progress reporting.
    pub async fn job_status(&self, token: JobToken) -> Result<Job, ScheduleError> {
        self.jobs
            .get_job_by_token(token)
            .await
            .map_err(ScheduleError::Job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use crate::impls::testing::{FailingJobStore, Pipeline, ScriptedConverter};
    use crate::impls::InMemoryJobStore;
    use crate::ports::{RunStatus, SystemClock, UlidGenerator};

    #[tokio::test]
    async fn empty_archive_key_is_rejected() {
        let pipeline = Pipeline::new(ScriptedConverter::succeeding());
        let err = pipeline.scheduler.schedule_import("  ").await.unwrap_err();
        assert!(matches!(err, ScheduleError::EmptyArchiveKey));
        assert!(pipeline.jobs.is_empty().await);
    }

    #[tokio::test]
    async fn job_is_pending_before_the_run_starts() {
        let pipeline = Pipeline::new(ScriptedConverter::succeeding());
        pipeline.upload("k.zip", &[("k.shp", "shp")]).await;

        let scheduled = pipeline.scheduler.schedule_import("k.zip").await.unwrap();
        assert_eq!(scheduled.run.run_id(), scheduled.token.to_string());
        assert_eq!(
            pipeline.jobs.status_history(scheduled.token).await.first(),
            Some(&JobStatus::Pending)
        );
        assert_eq!(scheduled.run.clone().wait().await, RunStatus::Completed);

        let job = pipeline.scheduler.job_status(scheduled.token).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn job_creation_failure_submits_nothing() {
        let pipeline = Pipeline::new(ScriptedConverter::succeeding());
        let scheduler = Scheduler::new(
            Arc::new(FailingJobStore),
            Arc::new(pipeline.engine.clone()),
            Arc::new(UlidGenerator::new(SystemClock)),
            pipeline.engine.task_queue(),
        );

        let err = scheduler.schedule_import("a.zip").await.unwrap_err();
        assert!(matches!(err, ScheduleError::CreateJob(_)));
        assert_eq!(pipeline.engine.counts().await.running, 0);
        assert_eq!(pipeline.engine.counts().await.completed, 0);
    }

    #[tokio::test]
    async fn submission_failure_marks_job_failed() {
        let pipeline = Pipeline::new(ScriptedConverter::succeeding());
        let jobs = Arc::new(InMemoryJobStore::new());
        let scheduler = Scheduler::new(
            jobs.clone(),
            Arc::new(pipeline.engine.clone()),
            Arc::new(UlidGenerator::new(SystemClock)),
            "nobody_polls_this",
        );

        let err = scheduler.schedule_import("a.zip").await.unwrap_err();
        let ScheduleError::Submit { token, .. } = err else {
            panic!("expected a submission error, got {err:?}");
        };
        let job = scheduler.job_status(token).await.unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().starts_with("failed to start workflow"));
        assert_eq!(
            jobs.status_history(token).await,
            vec![JobStatus::Pending, JobStatus::Failed]
        );
    }

    #[tokio::test]
    async fn unknown_job_is_reported() {
        let pipeline = Pipeline::new(ScriptedConverter::succeeding());
        let token = UlidGenerator::new(SystemClock).generate_job_token();
        assert!(matches!(
            pipeline.scheduler.job_status(token).await,
            Err(ScheduleError::Job(_))
        ));
    }
}
