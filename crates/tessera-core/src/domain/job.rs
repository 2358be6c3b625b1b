//! Job record and status management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{DbId, JobToken};

/// Persisted job status (the flat enum stored in the `status` column).
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed
/// - Pending -> Failed (workflow submission failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses a job may move to `self` from.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Completed => &[JobStatus::Processing],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Processing],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownJobStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownJobStatus(other.to_string())),
        }
    }
}

/// Status with the failure reason folded in: an error message can only
/// exist on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Processing,
    Completed,
    Failed(String),
}

impl JobOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        JobOutcome::Failed(reason.into())
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Pending => JobStatus::Pending,
            JobOutcome::Processing => JobStatus::Processing,
            JobOutcome::Completed => JobStatus::Completed,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Rebuild an outcome from its stored columns.
    ///
    /// A failed row without an error message gets an empty reason; an error
    /// on a non-failed row is dropped.
    pub fn from_parts(status: JobStatus, error: Option<String>) -> Self {
        match status {
            JobStatus::Pending => JobOutcome::Pending,
            JobStatus::Processing => JobOutcome::Processing,
            JobStatus::Completed => JobOutcome::Completed,
            JobStatus::Failed => JobOutcome::Failed(error.unwrap_or_default()),
        }
    }

    /// Check whether `next` may follow `self`.
    ///
    /// Writing the status a job already has is reported as `Ok(false)`
    /// (nothing to do) so that repeated status writes stay idempotent.
    pub fn check_transition(&self, next: &JobOutcome) -> Result<bool, InvalidJobTransition> {
        let (from, to) = (self.status(), next.status());
        if from == to {
            return Ok(false);
        }
        if to.predecessors().contains(&from) {
            Ok(true)
        } else {
            Err(InvalidJobTransition { from, to })
        }
    }
}

impl From<JobStatus> for JobOutcome {
    /// `Failed` gets an empty reason; use [`JobOutcome::failed`] to attach one.
    fn from(status: JobStatus) -> Self {
        JobOutcome::from_parts(status, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job status transition {from} -> {to}")]
pub struct InvalidJobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One tracked attempt to import an archive into a map layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: DbId,
    pub token: JobToken,
    pub outcome: JobOutcome,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        self.outcome.status()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(JobOutcome::Pending, JobOutcome::Processing)]
    #[case::complete(JobOutcome::Processing, JobOutcome::Completed)]
    #[case::fail(JobOutcome::Processing, JobOutcome::failed("boom"))]
    #[case::submission_failed(JobOutcome::Pending, JobOutcome::failed("submit"))]
    fn allowed_transitions(#[case] from: JobOutcome, #[case] to: JobOutcome) {
        assert_eq!(from.check_transition(&to), Ok(true));
    }

    #[rstest]
    #[case::skip_processing(JobOutcome::Pending, JobOutcome::Completed)]
    #[case::back_to_pending(JobOutcome::Processing, JobOutcome::Pending)]
    #[case::leave_completed(JobOutcome::Completed, JobOutcome::failed("late"))]
    #[case::leave_failed(JobOutcome::failed("x"), JobOutcome::Completed)]
    #[case::revive_failed(JobOutcome::failed("x"), JobOutcome::Processing)]
    fn rejected_transitions(#[case] from: JobOutcome, #[case] to: JobOutcome) {
        let err = from.check_transition(&to).unwrap_err();
        assert_eq!(err.from, from.status());
        assert_eq!(err.to, to.status());
    }

    #[test]
    fn repeated_write_is_a_noop() {
        assert_eq!(
            JobOutcome::Completed.check_transition(&JobOutcome::Completed),
            Ok(false)
        );
        assert_eq!(
            JobOutcome::failed("a").check_transition(&JobOutcome::failed("b")),
            Ok(false)
        );
    }

    #[test]
    fn error_only_on_failed() {
        assert_eq!(JobOutcome::failed("oops").error(), Some("oops"));
        assert_eq!(JobOutcome::Completed.error(), None);
        let o = JobOutcome::from_parts(JobStatus::Completed, Some("stale".into()));
        assert_eq!(o.error(), None);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn outcome_serializes_as_tagged_variant() {
        let v = serde_json::to_value(JobOutcome::failed("no shp")).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["reason"], "no shp");
        let v = serde_json::to_value(JobOutcome::Processing).unwrap();
        assert_eq!(v["status"], "processing");
    }
}
