//! Workflow trigger payload.

use serde::{Deserialize, Serialize};

use super::ids::JobToken;

/// Input of one import workflow run. Passed once at workflow start and
/// kept only in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEvent {
    pub job_token: JobToken,
    pub archive_key: String,
}
