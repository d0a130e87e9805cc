//! Typed errors for the pipeline and the orchestrator.

/// A stage failure inside one pipeline run.
///
/// Stage errors terminate only their own run; they are reported through the
/// task's `Finished` event and never escape past the orchestrator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to load audio: {0}")]
    Load(String),
    #[error("Noise reduction failed: {0}")]
    NoiseReduction(String),
    #[error("Speech enhancement failed: {0}")]
    Enhancement(String),
    #[error("Failed to encode output: {0}")]
    Encode(String),
}

/// Synchronous errors returned by orchestrator operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("A task named '{0}' already exists")]
    DuplicateName(String),
    #[error("No task named '{0}'")]
    UnknownTask(String),
    #[error("Task '{0}' is already running")]
    AlreadyRunning(String),
}
