use serde::{Deserialize, Serialize};

/// Snapshot of the runs known to a local engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}
