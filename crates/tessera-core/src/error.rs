use thiserror::Error;

use crate::domain::{InvalidTransition, JobToken, StepFailure, WorkflowState};
use crate::ports::{HistoryError, JobStoreError, SubmitError};

/// Failures of the execution engine itself, as opposed to activity failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("no handler registered for activity type={0}")]
    UnknownActivity(String),

    #[error("replay of run '{run_id}' diverged at step {seq}: recorded {recorded}, requested {requested}")]
    ReplayMismatch {
        run_id: String,
        seq: u32,
        recorded: String,
        requested: String,
    },

    #[error("payload of {activity} could not be encoded or decoded: {message}")]
    Payload { activity: String, message: String },

    #[error("workflow run '{0}' not found")]
    RunNotFound(String),

    #[error("workflow run '{run_id}' cannot be cancelled in state {state}")]
    NotCancellable { run_id: String, state: WorkflowState },
}

/// Why a workflow run ended without completing.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid workflow input: {0}")]
    Input(String),
}

impl From<HistoryError> for WorkflowError {
    fn from(e: HistoryError) -> Self {
        WorkflowError::Engine(e.into())
    }
}

impl From<InvalidTransition> for WorkflowError {
    fn from(e: InvalidTransition) -> Self {
        WorkflowError::Engine(e.into())
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("archive key must not be empty")]
    EmptyArchiveKey,

    #[error("failed to encode workflow input: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to create job record: {0}")]
    CreateJob(#[source] JobStoreError),

    #[error("failed to start workflow for job {token}: {source}")]
    Submit {
        token: JobToken,
        #[source]
        source: SubmitError,
    },

    #[error(transparent)]
    Job(JobStoreError),
}
