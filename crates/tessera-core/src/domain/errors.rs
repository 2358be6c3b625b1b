//! Errors - activity エラーと step 失敗の分類
//!
//! Activity は「リトライして良いか」を ErrorKind で返し、
//! engine はそれ以上 transport エラーを解釈しません。
//! Workflow から見えるのは成功か [`StepFailure`]（fatal / exhausted / timed out / cancelled）だけです。

use serde::{Deserialize, Serialize};
use std::fmt;

/// ErrorKind は activity エラーの分類
///
/// - Retryable: 一時的なエラー（ネットワーク、ロック競合など）。retry policy に従って再試行
/// - NonRetryable: 恒久的なエラー（geometry file がない、archive が存在しない）。即 fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retryable,
    NonRetryable,
}

/// Typed outcome of a failed activity attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ActivityError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActivityError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}

/// Why a step did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureKind {
    /// The activity reported a non-retryable error.
    Fatal,
    /// Every allowed attempt failed with a retryable error.
    Exhausted,
    /// The last allowed attempt ran past its start-to-close timeout.
    TimedOut,
    /// The run was cancelled while the step was in flight.
    Cancelled,
}

/// Fatal step failure as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub activity: String,
    pub kind: StepFailureKind,
    pub attempts: u32,
    pub message: String,
}

impl StepFailure {
    pub fn is_cancelled(&self) -> bool {
        self.kind == StepFailureKind::Cancelled
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StepFailureKind::Fatal => write!(f, "{}: {}", self.activity, self.message),
            StepFailureKind::Exhausted => write!(
                f,
                "{} failed after {} attempts: {}",
                self.activity, self.attempts, self.message
            ),
            StepFailureKind::TimedOut => write!(
                f,
                "{} timed out after {} attempts: {}",
                self.activity, self.attempts, self.message
            ),
            StepFailureKind::Cancelled => write!(f, "{} cancelled: {}", self.activity, self.message),
        }
    }
}

impl std::error::Error for StepFailure {}
