//! Domain model (IDs, jobs, layers, workflow state, errors, history records).

pub mod attempt;
pub mod errors;
pub mod event;
pub mod ids;
pub mod job;
pub mod layer;
pub mod state;

pub use attempt::{AttemptRecord, DecisionRecord};
pub use errors::{ActivityError, ErrorKind, StepFailure, StepFailureKind};
pub use event::ImportEvent;
pub use ids::{DbId, JobToken, ParseIdError, StyleKey};
pub use job::{InvalidJobTransition, Job, JobOutcome, JobStatus};
pub use layer::{GeometryType, Layer, NewLayer, Style, StyleFileRef};
pub use state::{InvalidTransition, WorkflowState, WorkflowStep};
