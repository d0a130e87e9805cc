//! Orchestrator lifecycle, event-ordering and cancellation behavior.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lecture_cleaner::{
    Orchestrator, OrchestratorError, PipelineEngine, SpeechEnhancer, TaskDescriptor, TaskEvent,
    TaskOutcome, TaskState, SUCCESS_MESSAGE,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn write_fixture(path: &Path, seconds: f32) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sample_rate = 22050u32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(seconds * sample_rate as f32) as usize {
        let noise = 0.01 * ((i as f32 * 12.9898).sin() * 43758.547).fract();
        writer.write_sample(noise).unwrap();
    }
    writer.finalize().unwrap();
}

/// Enhancement stage that holds its stage long enough for a test to act
/// while the task is still running.
struct SlowEnhancer(Duration);

impl SpeechEnhancer for SlowEnhancer {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn enhance(
        &self,
        _samples: &mut [f32],
        _sample_rate: u32,
        _channels: u16,
        _task: &TaskDescriptor,
    ) -> Result<(), String> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

async fn drain_until_finished(
    rx: &mut UnboundedReceiver<TaskEvent>,
    task: &str,
) -> (Vec<u8>, TaskOutcome, String) {
    let mut percents = Vec::new();
    loop {
        match rx.recv().await.expect("event stream closed early") {
            TaskEvent::Progress { name, percent } if name == task => percents.push(percent),
            TaskEvent::Finished {
                name,
                outcome,
                message,
            } if name == task => return (percents, outcome, message),
            _ => {}
        }
    }
}

#[tokio::test]
async fn run_to_completion_reports_ordered_progress() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("lecture1.wav");
    write_fixture(&input, 2.0);

    let (orch, mut rx) = Orchestrator::new(PipelineEngine::new());
    let task = TaskDescriptor::new(&input)
        .unwrap()
        .with_speech_enhancement(false);
    orch.add(task).unwrap();
    orch.start("lecture1").unwrap();

    let (percents, outcome, message) = drain_until_finished(&mut rx, "lecture1").await;

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(message, SUCCESS_MESSAGE);
    assert_eq!(percents, vec![10, 30, 80, 100]);
    assert!(dir.path().join("lecture1_cleaned.wav").exists());

    let snapshot = orch.status("lecture1").unwrap();
    assert_eq!(snapshot.state, TaskState::Completed);
    assert_eq!(snapshot.progress, 100);
}

#[tokio::test]
async fn restart_on_terminal_state_keeps_finished_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("lecture2.wav");
    write_fixture(&input, 1.5);

    let (orch, mut rx) = Orchestrator::new(PipelineEngine::new());
    orch.add(
        TaskDescriptor::new(&input)
            .unwrap()
            .with_speech_enhancement(false),
    )
    .unwrap();
    orch.start("lecture2").unwrap();

    // Restart the moment the registry shows a terminal state, racing the
    // previous run's terminal event
    while orch.status("lecture2").unwrap().state == TaskState::Running {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    orch.start("lecture2").unwrap();

    // The first run's Finished must precede every event of the second run;
    // a leaked Progress from the new run would show up in `first_percents`
    let (first_percents, first_outcome, _) = drain_until_finished(&mut rx, "lecture2").await;
    assert_eq!(first_outcome, TaskOutcome::Completed);
    assert_eq!(first_percents, vec![10, 30, 80, 100]);

    let (second_percents, second_outcome, _) = drain_until_finished(&mut rx, "lecture2").await;
    assert_eq!(second_outcome, TaskOutcome::Completed);
    assert_eq!(second_percents, vec![10, 30, 80, 100]);
}

#[tokio::test]
async fn failed_run_reports_message_and_is_retryable() {
    let (orch, mut rx) = Orchestrator::new(PipelineEngine::new());
    let task = TaskDescriptor::new("/nonexistent/lecture.wav").unwrap();
    orch.add(task).unwrap();

    orch.start("lecture").unwrap();
    let (_, outcome, message) = drain_until_finished(&mut rx, "lecture").await;
    assert_eq!(outcome, TaskOutcome::Failed);
    assert!(message.contains("Failed to load audio"));
    assert_eq!(orch.status("lecture").unwrap().state, TaskState::Failed);

    // Failed tasks stay registered and can be started again
    orch.start("lecture").unwrap();
    let (_, outcome, _) = drain_until_finished(&mut rx, "lecture").await;
    assert_eq!(outcome, TaskOutcome::Failed);
}

#[tokio::test]
async fn stop_cancels_run_and_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("talk.wav");
    write_fixture(&input, 2.0);

    let engine = PipelineEngine::with_enhancer(Arc::new(SlowEnhancer(Duration::from_secs(3))));
    let (orch, mut rx) = Orchestrator::new(engine);
    orch.add(TaskDescriptor::new(&input).unwrap()).unwrap();

    orch.start("talk").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    orch.stop("talk").await.unwrap();

    // stop() returned, so every event for this run is already delivered
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    match last {
        Some(TaskEvent::Finished { outcome, .. }) => assert_eq!(outcome, TaskOutcome::Cancelled),
        other => panic!("expected Finished event, got {:?}", other),
    }

    assert_eq!(orch.status("talk").unwrap().state, TaskState::Cancelled);
    assert!(!dir.path().join("talk_cleaned.wav").exists());

    // Stopping a task that is no longer running is a no-op
    orch.stop("talk").await.unwrap();
}

#[tokio::test]
async fn start_while_running_is_rejected_without_duplicate_events() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("talk.wav");
    write_fixture(&input, 2.0);

    let engine = PipelineEngine::with_enhancer(Arc::new(SlowEnhancer(Duration::from_secs(3))));
    let (orch, mut rx) = Orchestrator::new(engine);
    orch.add(TaskDescriptor::new(&input).unwrap()).unwrap();

    orch.start("talk").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        orch.start("talk"),
        Err(OrchestratorError::AlreadyRunning("talk".to_string()))
    );

    orch.stop("talk").await.unwrap();

    let mut finished = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, TaskEvent::Finished { .. }) {
            finished += 1;
        }
    }
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn remove_running_task_purges_and_allows_readd() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("talk.wav");
    write_fixture(&input, 2.0);

    let engine = PipelineEngine::with_enhancer(Arc::new(SlowEnhancer(Duration::from_secs(3))));
    let (orch, _rx) = Orchestrator::new(engine);
    orch.add(TaskDescriptor::new(&input).unwrap()).unwrap();

    orch.start("talk").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    orch.remove("talk").await.unwrap();

    assert!(orch.status("talk").is_none());
    orch.add(TaskDescriptor::new(&input).unwrap()).unwrap();
}

#[tokio::test]
async fn unknown_task_operations_error() {
    let (orch, _rx) = Orchestrator::new(PipelineEngine::new());
    assert_eq!(
        orch.start("ghost"),
        Err(OrchestratorError::UnknownTask("ghost".to_string()))
    );
    assert_eq!(
        orch.stop("ghost").await,
        Err(OrchestratorError::UnknownTask("ghost".to_string()))
    );
    assert_eq!(
        orch.remove("ghost").await,
        Err(OrchestratorError::UnknownTask("ghost".to_string()))
    );
}

#[tokio::test]
async fn start_all_and_stop_all_cover_every_task() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.wav", "b.wav"] {
        write_fixture(&dir.path().join(name), 2.0);
    }

    let engine = PipelineEngine::with_enhancer(Arc::new(SlowEnhancer(Duration::from_secs(3))));
    let (orch, _rx) = Orchestrator::new(engine);
    orch.add(TaskDescriptor::new(dir.path().join("a.wav")).unwrap())
        .unwrap();
    orch.add(TaskDescriptor::new(dir.path().join("b.wav")).unwrap())
        .unwrap();

    assert_eq!(orch.start_all(), 2);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orch.list().iter().all(|s| s.state == TaskState::Running));

    orch.stop_all().await;
    assert!(orch
        .list()
        .iter()
        .all(|s| s.state != TaskState::Running));
}
