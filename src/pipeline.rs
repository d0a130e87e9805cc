//! The staged processing pipeline for one task.
//!
//! Stages: load, noise reduction, optional speech enhancement, encode. Each
//! stage has a progress checkpoint and its own failure mode; cancellation is
//! observed at stage boundaries only. A cancelled run writes nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio;
use crate::denoise;
use crate::enhance::{IdentityEnhancer, SpeechEnhancer};
use crate::error::PipelineError;
use crate::events::RunOutcome;
use crate::task::TaskDescriptor;

/// Cooperative cancellation signal for one run.
///
/// Checked between stages; a stage already in flight finishes its in-memory
/// computation before the boundary check aborts the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes the staged transform for one task descriptor.
pub struct PipelineEngine {
    enhancer: Arc<dyn SpeechEnhancer>,
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineEngine {
    /// Engine with the passthrough enhancement stage.
    pub fn new() -> Self {
        Self {
            enhancer: Arc::new(IdentityEnhancer),
        }
    }

    /// Engine with a specific enhancement implementation.
    pub fn with_enhancer(enhancer: Arc<dyn SpeechEnhancer>) -> Self {
        Self { enhancer }
    }

    /// Run the pipeline to a terminal outcome.
    ///
    /// `progress` receives the checkpoint percentages (10, 30, 60 when
    /// enhancement is enabled, 80, 100) in increasing order; 100 is reported
    /// only on success. A cancel requested once the encode stage has begun
    /// is not observed: the output file already exists by then, so the run
    /// reports success instead of a cancellation that left output behind.
    pub fn execute(
        &self,
        task: &TaskDescriptor,
        progress: &mut dyn FnMut(u8),
        cancel: &CancelToken,
    ) -> RunOutcome {
        let output_path = task.output_path();
        log::info!(
            "Processing '{}': {} -> {} ({:?}, enhancement {})",
            task.name,
            task.input_path.display(),
            output_path.display(),
            task.noise_reduction_level,
            if task.enable_speech_enhancement {
                self.enhancer.name()
            } else {
                "off"
            }
        );

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        progress(10);
        log::debug!("'{}': loading input", task.name);
        let mut audio = match audio::decode(&task.input_path) {
            Ok(audio) => audio,
            Err(e) => return RunOutcome::Failed(e),
        };

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        progress(30);
        log::debug!(
            "'{}': noise reduction on {} frames at {} Hz",
            task.name,
            audio.frames(),
            audio.sample_rate
        );
        if let Err(e) = denoise::reduce_noise(
            &mut audio.samples,
            audio.sample_rate,
            audio.channels,
            task.noise_reduction_level,
        ) {
            return RunOutcome::Failed(e);
        }

        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        if task.enable_speech_enhancement {
            progress(60);
            log::debug!("'{}': speech enhancement ({})", task.name, self.enhancer.name());
            if let Err(e) =
                self.enhancer
                    .enhance(&mut audio.samples, audio.sample_rate, audio.channels, task)
            {
                return RunOutcome::Failed(PipelineError::Enhancement(e));
            }

            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }
        }

        progress(80);
        if let Err(e) = audio::encode(
            &audio.samples,
            audio.sample_rate,
            audio.channels,
            &output_path,
            task.output_format(),
        ) {
            return RunOutcome::Failed(e);
        }

        progress(100);
        log::info!("'{}' completed", task.name);
        RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_before_start_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let task = TaskDescriptor::new(dir.path().join("missing.wav")).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut checkpoints = Vec::new();
        let outcome = PipelineEngine::new().execute(&task, &mut |p| checkpoints.push(p), &cancel);

        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert!(checkpoints.is_empty());
        assert!(!task.output_path().exists());
    }

    #[test]
    fn test_missing_input_fails_at_load() {
        let task = TaskDescriptor::new("/nonexistent/lecture.wav").unwrap();
        let outcome = PipelineEngine::new().execute(&task, &mut |_| {}, &CancelToken::new());
        assert!(matches!(
            outcome,
            RunOutcome::Failed(PipelineError::Load(_))
        ));
    }
}
