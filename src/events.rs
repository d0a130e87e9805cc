//! Event stream contract between the orchestrator and a presentation layer.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Terminal result of one pipeline run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(PipelineError),
}

/// How a run ended, as reported on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Events delivered to subscribers for every registered task.
///
/// Events for one task are strictly ordered: progress percentages are
/// non-decreasing and `Finished` is always the last event of a run. Events
/// from different tasks may interleave arbitrarily.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum TaskEvent {
    Progress {
        name: String,
        percent: u8,
    },
    Finished {
        name: String,
        outcome: TaskOutcome,
        message: String,
    },
}
