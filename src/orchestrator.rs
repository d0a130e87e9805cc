//! Task orchestration: registry, per-task execution units, event stream.
//!
//! Each started task runs the pipeline on its own blocking worker; a small
//! forwarder task owns all updates to the task's execution record while it
//! runs, so a natural finish and a concurrent `stop` never race on shared
//! state. `stop` returns only after the worker has fully terminated, which
//! guarantees no further events for that run arrive afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::OrchestratorError;
use crate::events::{RunOutcome, TaskEvent, TaskOutcome};
use crate::pipeline::{CancelToken, PipelineEngine};
use crate::task::TaskDescriptor;

/// Message reported with a successful run (fixed contract with presentation
/// layers).
pub const SUCCESS_MESSAGE: &str = "Processing completed successfully";
const CANCELLED_MESSAGE: &str = "Task cancelled";

/// Lifecycle state of one registered task.
///
/// Terminal states are re-startable; `Running` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Point-in-time view of a task for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub name: String,
    pub state: TaskState,
    pub progress: u8,
    pub message: Option<String>,
}

struct RunHandle {
    cancel: CancelToken,
    join: JoinHandle<()>,
}

struct ExecutionRecord {
    descriptor: TaskDescriptor,
    state: TaskState,
    progress: u8,
    message: Option<String>,
    run: Option<RunHandle>,
}

impl ExecutionRecord {
    fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            descriptor,
            state: TaskState::Idle,
            progress: 0,
            message: None,
            run: None,
        }
    }

    fn snapshot(&self, name: &str) -> TaskSnapshot {
        TaskSnapshot {
            name: name.to_string(),
            state: self.state,
            progress: self.progress,
            message: self.message.clone(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, ExecutionRecord>>>;

/// Owns the set of registered tasks and their execution units.
pub struct Orchestrator {
    engine: Arc<PipelineEngine>,
    registry: Registry,
    events: mpsc::UnboundedSender<TaskEvent>,
}

impl Orchestrator {
    /// Create an orchestrator and the event stream its presentation layer
    /// consumes.
    pub fn new(engine: PipelineEngine) -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                engine: Arc::new(engine),
                registry: Arc::new(Mutex::new(HashMap::new())),
                events,
            },
            rx,
        )
    }

    /// Register a task. Names are unique across the whole registry,
    /// including tasks resting in a terminal state.
    pub fn add(&self, descriptor: TaskDescriptor) -> Result<(), OrchestratorError> {
        let mut registry = self.registry.lock().expect("registry poisoned");
        if registry.contains_key(&descriptor.name) {
            return Err(OrchestratorError::DuplicateName(descriptor.name.clone()));
        }
        log::info!("Registered task '{}'", descriptor.name);
        registry.insert(descriptor.name.clone(), ExecutionRecord::new(descriptor));
        Ok(())
    }

    /// Start a task on its own execution unit and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut registry = self.registry.lock().expect("registry poisoned");
        let record = registry
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownTask(name.to_string()))?;

        if record.state == TaskState::Running {
            return Err(OrchestratorError::AlreadyRunning(name.to_string()));
        }

        // Clear the previous run's outcome
        record.state = TaskState::Running;
        record.progress = 0;
        record.message = None;

        let cancel = CancelToken::new();
        let join = self.spawn_run(name.to_string(), record.descriptor.clone(), cancel.clone());
        record.run = Some(RunHandle { cancel, join });

        log::info!("Started task '{}'", name);
        Ok(())
    }

    fn spawn_run(
        &self,
        name: String,
        descriptor: TaskDescriptor,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();

        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u8>();

            let worker = {
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || {
                    engine.execute(
                        &descriptor,
                        &mut |percent| {
                            let _ = progress_tx.send(percent);
                        },
                        &cancel,
                    )
                })
            };

            // The worker's sender is dropped when the run ends, so this loop
            // drains every progress checkpoint before the terminal event
            while let Some(percent) = progress_rx.recv().await {
                {
                    let mut registry = registry.lock().expect("registry poisoned");
                    if let Some(record) = registry.get_mut(&name) {
                        if percent < record.progress {
                            continue;
                        }
                        record.progress = percent;
                    }
                }
                let _ = events.send(TaskEvent::Progress {
                    name: name.clone(),
                    percent,
                });
            }

            let (state, task_outcome, message) = match worker.await {
                Err(e) => {
                    log::error!("Task '{}' worker panicked: {}", name, e);
                    (
                        TaskState::Failed,
                        TaskOutcome::Failed,
                        format!("Worker terminated abnormally: {}", e),
                    )
                }
                Ok(outcome) => match outcome {
                    RunOutcome::Completed => (
                        TaskState::Completed,
                        TaskOutcome::Completed,
                        SUCCESS_MESSAGE.to_string(),
                    ),
                    RunOutcome::Cancelled => (
                        TaskState::Cancelled,
                        TaskOutcome::Cancelled,
                        CANCELLED_MESSAGE.to_string(),
                    ),
                    RunOutcome::Failed(e) => {
                        log::error!("Task '{}' failed: {}", name, e);
                        (TaskState::Failed, TaskOutcome::Failed, e.to_string())
                    }
                },
            };

            // Terminal state and terminal event must be atomic with respect
            // to the registry lock: a caller that observes the terminal
            // state and restarts immediately must find this run's Finished
            // already enqueued ahead of the new run's first Progress.
            // The sender is unbounded, so sending under the lock never
            // blocks.
            let mut registry = registry.lock().expect("registry poisoned");
            if let Some(record) = registry.get_mut(&name) {
                record.state = state;
                record.message = Some(message.clone());
                record.run = None;
            }
            let _ = events.send(TaskEvent::Finished {
                name: name.clone(),
                outcome: task_outcome,
                message,
            });
        })
    }

    /// Request cancellation and wait until the execution unit has fully
    /// terminated. No-op when the task is not running.
    pub async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        let run = {
            let mut registry = self.registry.lock().expect("registry poisoned");
            let record = registry
                .get_mut(name)
                .ok_or_else(|| OrchestratorError::UnknownTask(name.to_string()))?;
            record.run.take()
        };

        if let Some(run) = run {
            log::info!("Stopping task '{}'", name);
            run.cancel.cancel();
            let _ = run.join.await;
        }
        Ok(())
    }

    /// Stop the task if running, then discard its record. The same name can
    /// be registered again afterwards.
    pub async fn remove(&self, name: &str) -> Result<(), OrchestratorError> {
        self.stop(name).await?;
        let mut registry = self.registry.lock().expect("registry poisoned");
        registry.remove(name);
        log::info!("Removed task '{}'", name);
        Ok(())
    }

    /// Start every task that is not already running; returns how many were
    /// started. An empty registry is a soft condition, not an error.
    pub fn start_all(&self) -> usize {
        let names: Vec<String> = {
            let registry = self.registry.lock().expect("registry poisoned");
            registry.keys().cloned().collect()
        };

        if names.is_empty() {
            log::warn!("start_all: no tasks registered");
            return 0;
        }

        let mut started = 0;
        for name in names {
            match self.start(&name) {
                Ok(()) => started += 1,
                Err(OrchestratorError::AlreadyRunning(_)) => {}
                Err(e) => log::warn!("start_all: {}", e),
            }
        }
        started
    }

    /// Stop every running task, waiting for each to terminate.
    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let registry = self.registry.lock().expect("registry poisoned");
            registry.keys().cloned().collect()
        };
        for name in names {
            let _ = self.stop(&name).await;
        }
    }

    /// Snapshot of one task, if registered.
    pub fn status(&self, name: &str) -> Option<TaskSnapshot> {
        let registry = self.registry.lock().expect("registry poisoned");
        registry.get(name).map(|r| r.snapshot(name))
    }

    /// Snapshots of every registered task.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let registry = self.registry.lock().expect("registry poisoned");
        let mut snapshots: Vec<TaskSnapshot> = registry
            .iter()
            .map(|(name, record)| record.snapshot(name))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
