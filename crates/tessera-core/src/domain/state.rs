//! Workflow state machine for one import run.
//!
//! This is distinct from (but drives) the persisted [`JobStatus`](super::JobStatus).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow state.
///
/// State transitions:
/// - Started -> Processing -> Importing -> Registering -> Completed
/// - any state after Started -> Failed { from }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Started,
    Processing,
    Importing,
    Registering,
    Completed,
    Failed { from: WorkflowStep },
}

/// Non-terminal states a run can fail out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Processing,
    Importing,
    Registering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid workflow transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed { .. })
    }

    /// Cancellation is honoured only while an import or registration is in flight.
    pub fn is_cancellable(self) -> bool {
        matches!(self, WorkflowState::Importing | WorkflowState::Registering)
    }

    /// The step a failure out of this state is attributed to.
    pub fn as_step(self) -> Option<WorkflowStep> {
        match self {
            WorkflowState::Processing => Some(WorkflowStep::Processing),
            WorkflowState::Importing => Some(WorkflowStep::Importing),
            WorkflowState::Registering => Some(WorkflowStep::Registering),
            _ => None,
        }
    }

    /// Validate and perform a transition.
    pub fn advance(self, next: WorkflowState) -> Result<WorkflowState, InvalidTransition> {
        use WorkflowState::*;
        let ok = match (self, next) {
            (Started, Processing)
            | (Processing, Importing)
            | (Importing, Registering)
            | (Registering, Completed) => true,
            (from, Failed { from: step }) => from.as_step() == Some(step),
            _ => false,
        };
        if ok {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Transition into `Failed`, attributing the failure to the current state.
    pub fn fail(self) -> Result<WorkflowState, InvalidTransition> {
        match self.as_step() {
            Some(from) => Ok(WorkflowState::Failed { from }),
            None => Err(InvalidTransition {
                from: self,
                to: WorkflowState::Failed {
                    from: WorkflowStep::Processing,
                },
            }),
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Started => f.write_str("started"),
            WorkflowState::Processing => f.write_str("processing"),
            WorkflowState::Importing => f.write_str("importing"),
            WorkflowState::Registering => f.write_str("registering"),
            WorkflowState::Completed => f.write_str("completed"),
            WorkflowState::Failed { from } => write!(f, "failed(from {from:?})"),
        }
    }
}
