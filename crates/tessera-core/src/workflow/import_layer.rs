//! ImportLayerWorkflow - archive 1 つを map layer にする workflow
//!
//! # 状態遷移
//! ```text
//! Started ──(job: processing)──▶ Processing ──▶ Importing ──(FetchAndConvert)──▶ Registering
//!                                                   │                               │
//!                                                   ▼                       (RegisterLayer)
//!                                          Failed{Importing}                        │
//!                                                                     ┌─────────────┴──────────┐
//!                                                                     ▼                        ▼
//!                                                      Failed{Registering}            Completed
//!                                                      + RemoveStyleFile(sld)    (job: completed)
//!                                                      + DropTable(layer)
//! ```
//!
//! 失敗時は compensation、job を failed に更新、通知の順に実行します。
//! 通知は best-effort で、失敗しても run の結果は変わりません。

use async_trait::async_trait;

use super::options::WorkflowOptions;
use super::saga::{Compensation, Saga};
use crate::activity::{
    Activity, CompensateDropTable, CompensateRemoveStyle, FetchAndConvert, Notify, RegisterLayer,
    UpdateJobStatus,
};
use crate::domain::{
    ImportEvent, JobOutcome, JobStatus, JobToken, StepFailure, StepFailureKind, WorkflowState,
};
use crate::engine::{Workflow, WorkflowContext};
use crate::error::WorkflowError;

pub struct ImportLayerWorkflow {
    options: WorkflowOptions,
}

impl ImportLayerWorkflow {
    pub fn new(options: WorkflowOptions) -> Self {
        Self { options }
    }

    /// Failure branch: compensate, settle the job as failed, notify.
    async fn fail(
        &self,
        ctx: &mut WorkflowContext,
        saga: Saga,
        job_token: JobToken,
        failure: StepFailure,
    ) -> Result<(), WorkflowError> {
        ctx.fail().await?;
        saga.compensate(ctx, &self.options.compensate).await?;

        let update = UpdateJobStatus {
            job_token,
            outcome: JobOutcome::failed(failure_reason(&failure)),
        };
        match ctx.execute(update, &self.options.job_status).await {
            Ok(()) => {}
            Err(WorkflowError::Step(e)) => {
                tracing::error!(%job_token, error = %e, "could not mark job as failed");
            }
            Err(e) => return Err(e),
        }

        self.notify(ctx, job_token, JobStatus::Failed).await?;
        Err(failure.into())
    }

    async fn notify(
        &self,
        ctx: &mut WorkflowContext,
        job_token: JobToken,
        status: JobStatus,
    ) -> Result<(), WorkflowError> {
        let input = Notify { job_token, status };
        match ctx.execute(input, &self.options.notify).await {
            Ok(()) => Ok(()),
            Err(WorkflowError::Step(e)) => {
                tracing::warn!(%job_token, %status, error = %e, "notification dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Workflow for ImportLayerWorkflow {
    const TYPE: &'static str = "ImportLayerWorkflow";
    const ACTIVITIES: &'static [&'static str] = &[
        UpdateJobStatus::TYPE,
        FetchAndConvert::TYPE,
        RegisterLayer::TYPE,
        CompensateDropTable::TYPE,
        CompensateRemoveStyle::TYPE,
        Notify::TYPE,
    ];
    type Input = ImportEvent;

    async fn run(&self, ctx: &mut WorkflowContext, event: ImportEvent) -> Result<(), WorkflowError> {
        let job_token = event.job_token;
        tracing::info!(run_id = %ctx.run_id(), %job_token, archive_key = %event.archive_key, "import started");

        // failing here aborts the run and leaves the job pending
        ctx.execute(
            UpdateJobStatus {
                job_token,
                outcome: JobOutcome::Processing,
            },
            &self.options.job_status,
        )
        .await?;
        ctx.transition(WorkflowState::Processing).await?;

        let mut saga = Saga::new();

        ctx.transition(WorkflowState::Importing).await?;
        let fetch = FetchAndConvert {
            archive_key: event.archive_key,
        };
        let imported = match ctx.execute(fetch, &self.options.import).await {
            Ok(imported) => imported,
            Err(WorkflowError::Step(failure)) => {
                return self.fail(ctx, saga, job_token, failure).await;
            }
            Err(e) => return Err(e),
        };
        // the converter may have created the table even if registration fails
        saga.push(Compensation::DropTable {
            layer_name: imported.layer_name.clone(),
        });
        if let Some(style_file) = &imported.style_file {
            saga.push(Compensation::RemoveStyleFile {
                style_file: style_file.clone(),
            });
        }

        ctx.transition(WorkflowState::Registering).await?;
        let register = RegisterLayer {
            layer_name: imported.layer_name,
            geometry_type: imported.geometry_type,
            style_file: imported.style_file,
        };
        let registered = match ctx.execute(register, &self.options.register).await {
            Ok(registered) => registered,
            Err(WorkflowError::Step(failure)) => {
                return self.fail(ctx, saga, job_token, failure).await;
            }
            Err(e) => return Err(e),
        };

        ctx.transition(WorkflowState::Completed).await?;
        ctx.execute(
            UpdateJobStatus {
                job_token,
                outcome: JobOutcome::Completed,
            },
            &self.options.job_status,
        )
        .await?;
        tracing::info!(%job_token, layer_id = registered.layer_id, created = registered.created, "import completed");

        self.notify(ctx, job_token, JobStatus::Completed).await
    }
}

/// Error message stored on the job.
fn failure_reason(failure: &StepFailure) -> String {
    match failure.kind {
        StepFailureKind::Fatal => failure.message.clone(),
        StepFailureKind::Exhausted | StepFailureKind::TimedOut | StepFailureKind::Cancelled => {
            failure.to_string()
        }
    }
}
