//! step 履歴に残す attempt / retry 判断の記録

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One call of an activity handler. `error` is empty when the call returned Ok.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1 始まり
    pub attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn succeeded(attempt: u32, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            error: None,
            started_at,
            completed_at,
        }
    }

    pub fn failed(
        attempt: u32,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt,
            error: Some(error.into()),
            started_at,
            completed_at,
        }
    }
}

/// Outcome of consulting the retry policy after a failed attempt.
///
/// `trigger` is the failure that was judged, `decision` is `schedule_retry`
/// or `give_up`, and `context` carries the attempt count and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub trigger: serde_json::Value,
    pub policy: String,
    pub decision: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        context: Option<serde_json::Value>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context,
            decided_at,
        }
    }
}
