//! Batch cleanup of spoken-word recordings.
//!
//! Estimates a noise profile from each recording's opening second, suppresses
//! that noise spectrally, optionally runs a speech-enhancement stage, and
//! re-encodes the result next to the source. The [`Orchestrator`] runs many
//! tasks concurrently with live progress events and cooperative per-task
//! cancellation; a presentation layer drives it through descriptors and the
//! event stream.

pub mod audio;
pub mod denoise;
pub mod enhance;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod task;

pub use enhance::{ClarityEnhancer, IdentityEnhancer, SpeechEnhancer};
pub use error::{OrchestratorError, PipelineError};
pub use events::{RunOutcome, TaskEvent, TaskOutcome};
pub use orchestrator::{Orchestrator, TaskSnapshot, TaskState, SUCCESS_MESSAGE};
pub use pipeline::{CancelToken, PipelineEngine};
pub use task::{
    BackgroundNoiseLevel, NoiseReductionLevel, OutputFormat, SpeechEnhancementLevel,
    TaskDescriptor,
};
