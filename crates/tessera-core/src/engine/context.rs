//! WorkflowContext - 1 つの workflow run の実行コンテキスト
//!
//! # 責務
//! - activity の実行（retry policy, start-to-close timeout, cancel）
//! - step 結果の durable な記録（sequence 番号ごと）
//! - resume 時の replay（記録済みの step は activity を呼ばずに結果を返す）
//! - 状態遷移の検証と永続化

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::retry::{ActivityOptions, Decider, Decision};
use crate::activity::{Activity, ActivityRegistry, DynHandler};
use crate::domain::{
    ActivityError, AttemptRecord, DecisionRecord, StepFailure, StepFailureKind, WorkflowState,
};
use crate::error::{EngineError, WorkflowError};
use crate::ports::{Clock, HistoryStore, StepRecord, StepResult};

/// Engine-side services shared by every run.
#[derive(Clone)]
pub(crate) struct Services {
    pub history: Arc<dyn HistoryStore>,
    pub registry: Arc<ActivityRegistry>,
    pub decider: Arc<dyn Decider>,
    pub clock: Arc<dyn Clock>,
}

enum AttemptOutcome {
    Completed(serde_json::Value),
    Failed(ActivityError),
    TimedOut(Duration),
    Cancelled,
}

pub struct WorkflowContext {
    run_id: String,
    services: Services,
    state: watch::Sender<WorkflowState>,
    cancel: CancellationToken,
    /// Steps recorded by an earlier execution of this run, by sequence number.
    recorded: BTreeMap<u32, StepRecord>,
    seq: u32,
}

impl WorkflowContext {
    pub(crate) fn new(
        run_id: String,
        services: Services,
        state: watch::Sender<WorkflowState>,
        cancel: CancellationToken,
        recorded: Vec<StepRecord>,
    ) -> Self {
        Self {
            run_id,
            services,
            state,
            cancel,
            recorded: recorded.into_iter().map(|s| (s.seq, s)).collect(),
            seq: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> WorkflowState {
        *self.state.borrow()
    }

    /// Validate and persist a state transition.
    ///
    /// On resume the workflow walks its transitions again from `Started`;
    /// each one is re-validated and re-persisted.
    pub async fn transition(&mut self, next: WorkflowState) -> Result<(), WorkflowError> {
        let current = self.state();
        let next = current.advance(next)?;
        self.services
            .history
            .record_state(&self.run_id, next)
            .await?;
        self.state.send_replace(next);
        tracing::info!(run_id = %self.run_id, from = %current, to = %next, "workflow transition");
        Ok(())
    }

    /// Move into `Failed`, attributing the failure to the current state.
    pub async fn fail(&mut self) -> Result<(), WorkflowError> {
        let next = self.state().fail()?;
        self.transition(next).await
    }

    /// Execute activity `A` under `options` and durably record the result.
    ///
    /// Returns the recorded result without invoking the activity when this
    /// step was already recorded by an earlier execution of the run.
    pub async fn execute<A: Activity>(
        &mut self,
        input: A,
        options: &ActivityOptions,
    ) -> Result<A::Output, WorkflowError> {
        self.seq += 1;
        let seq = self.seq;

        let result = match self.recorded.remove(&seq) {
            Some(step) => {
                if step.activity != A::TYPE {
                    return Err(EngineError::ReplayMismatch {
                        run_id: self.run_id.clone(),
                        seq,
                        recorded: step.activity,
                        requested: A::TYPE.to_string(),
                    }
                    .into());
                }
                tracing::debug!(run_id = %self.run_id, seq, activity = A::TYPE, "replaying recorded step");
                step.result
            }
            None => {
                let handler = self
                    .services
                    .registry
                    .get(A::TYPE)
                    .ok_or_else(|| EngineError::UnknownActivity(A::TYPE.to_string()))?;
                let payload = serde_json::to_value(&input).map_err(|e| EngineError::Payload {
                    activity: A::TYPE.to_string(),
                    message: e.to_string(),
                })?;
                let step = self.run_step(seq, handler, payload, options).await;
                self.services.history.record_step(&self.run_id, &step).await?;
                step.result
            }
        };

        match result {
            StepResult::Completed(value) => {
                serde_json::from_value(value).map_err(|e| {
                    EngineError::Payload {
                        activity: A::TYPE.to_string(),
                        message: e.to_string(),
                    }
                    .into()
                })
            }
            StepResult::Failed(failure) => Err(failure.into()),
        }
    }

    async fn run_step(
        &self,
        seq: u32,
        handler: Arc<dyn DynHandler>,
        payload: serde_json::Value,
        options: &ActivityOptions,
    ) -> StepRecord {
        let activity = handler.activity_type();
        let clock = &self.services.clock;
        let mut attempts = Vec::new();
        let mut decisions = Vec::new();
        let mut attempt: u32 = 0;

        let result = loop {
            attempt += 1;
            let started_at = clock.now();
            let outcome = self
                .run_attempt(handler.as_ref(), payload.clone(), options.start_to_close_timeout)
                .await;
            let completed_at = clock.now();

            let (error, timed_out) = match outcome {
                AttemptOutcome::Completed(value) => {
                    attempts.push(AttemptRecord::succeeded(attempt, started_at, completed_at));
                    tracing::info!(run_id = %self.run_id, activity, attempt, "activity succeeded");
                    break StepResult::Completed(value);
                }
                AttemptOutcome::Cancelled => {
                    attempts.push(AttemptRecord::failed(attempt, "cancelled", started_at, completed_at));
                    break cancelled(activity, attempt);
                }
                AttemptOutcome::Failed(error) => (error, false),
                AttemptOutcome::TimedOut(limit) => (
                    ActivityError::retryable(format!("start-to-close timeout of {limit:?} exceeded")),
                    true,
                ),
            };
            attempts.push(AttemptRecord::failed(
                attempt,
                error.message.clone(),
                started_at,
                completed_at,
            ));

            let decision = self.services.decider.decide(&options.retry, attempt, &error);
            decisions.push(DecisionRecord::new(
                json!({ "attempt": attempt, "kind": error.kind, "error": error.message }),
                "retry_policy",
                decision.name(),
                Some(json!({
                    "maximum_attempts": options.retry.attempt_budget(),
                    "reason": decision.reason(),
                })),
                clock.now(),
            ));

            match decision {
                Decision::Retry { delay, reason } => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        activity,
                        attempt,
                        error = %error,
                        %reason,
                        "activity failed, retrying"
                    );
                    if !self.backoff(delay).await {
                        break cancelled(activity, attempt);
                    }
                }
                Decision::GiveUp { reason } => {
                    let kind = if !error.is_retryable() {
                        StepFailureKind::Fatal
                    } else if timed_out {
                        StepFailureKind::TimedOut
                    } else {
                        StepFailureKind::Exhausted
                    };
                    tracing::error!(
                        run_id = %self.run_id,
                        activity,
                        attempt,
                        error = %error,
                        %reason,
                        "activity failed"
                    );
                    break StepResult::Failed(StepFailure {
                        activity: activity.to_string(),
                        kind,
                        attempts: attempt,
                        message: error.message,
                    });
                }
            }
        };

        StepRecord {
            seq,
            activity: activity.to_string(),
            result,
            attempts,
            decisions,
        }
    }

    /// One attempt, raced against the timeout and, in a cancellable state,
    /// against cancellation. Dropping the activity future on either releases
    /// whatever it holds (workspace, converter process).
    async fn run_attempt(
        &self,
        handler: &dyn DynHandler,
        payload: serde_json::Value,
        limit: Duration,
    ) -> AttemptOutcome {
        let attempt = async {
            match tokio::time::timeout(limit, handler.handle_dyn(payload)).await {
                Ok(Ok(value)) => AttemptOutcome::Completed(value),
                Ok(Err(error)) => AttemptOutcome::Failed(error),
                Err(_) => AttemptOutcome::TimedOut(limit),
            }
        };
        if !self.state().is_cancellable() {
            return attempt.await;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => AttemptOutcome::Cancelled,
            outcome = attempt => outcome,
        }
    }

    /// Sleep before a retry; `false` when cancelled meanwhile.
    async fn backoff(&self, delay: Duration) -> bool {
        if !self.state().is_cancellable() {
            tokio::time::sleep(delay).await;
            return true;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

fn cancelled(activity: &str, attempts: u32) -> StepResult {
    StepResult::Failed(StepFailure {
        activity: activity.to_string(),
        kind: StepFailureKind::Cancelled,
        attempts,
        message: "workflow run cancelled".to_string(),
    })
}
