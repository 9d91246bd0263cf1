//! Lifecycle events and event handling.
//!
//! The graph executor and the pipeline runner emit [`Event`]s through an
//! [`EventBus`] so callers can observe a run (log it, record it in tests,
//! render progress) without coupling to the scheduler.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::artifact::ArtifactId;
use crate::core::types::{GraphId, RunId, TaskId};

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A run has started.
    RunStarted {
        run_id: RunId,
        graph_id: GraphId,
        task_count: usize,
        timestamp: Instant,
    },

    /// A task acquired its resources and is about to run.
    TaskStarted {
        run_id: RunId,
        task_id: TaskId,
        timestamp: Instant,
    },

    /// A task completed successfully and its outputs were recorded.
    TaskCompleted {
        run_id: RunId,
        task_id: TaskId,
        duration: Duration,
        exit_code: Option<i32>,
        artifact_count: usize,
        timestamp: Instant,
    },

    /// A task failed.
    TaskFailed {
        run_id: RunId,
        task_id: TaskId,
        error: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
        timestamp: Instant,
    },

    /// A task was never launched because another task failed.
    TaskSkipped {
        run_id: RunId,
        task_id: TaskId,
        timestamp: Instant,
    },

    /// A run finished, successfully or not.
    RunCompleted {
        run_id: RunId,
        graph_id: GraphId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// An artifact was copied to its external destination.
    ArtifactPublished {
        run_id: RunId,
        artifact: ArtifactId,
        destination: PathBuf,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. }
            | Event::TaskStarted { timestamp, .. }
            | Event::TaskCompleted { timestamp, .. }
            | Event::TaskFailed { timestamp, .. }
            | Event::TaskSkipped { timestamp, .. }
            | Event::RunCompleted { timestamp, .. }
            | Event::ArtifactPublished { timestamp, .. } => *timestamp,
        }
    }

    /// The run this event belongs to.
    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::TaskStarted { run_id, .. }
            | Event::TaskCompleted { run_id, .. }
            | Event::TaskFailed { run_id, .. }
            | Event::TaskSkipped { run_id, .. }
            | Event::RunCompleted { run_id, .. }
            | Event::ArtifactPublished { run_id, .. } => *run_id,
        }
    }

    /// The task this event is about, for task-level events.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskStarted { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskSkipped { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(run_id: RunId, graph_id: GraphId, task_count: usize) -> Self {
        Event::RunStarted {
            run_id,
            graph_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(run_id: RunId, task_id: TaskId) -> Self {
        Event::TaskStarted {
            run_id,
            task_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(
        run_id: RunId,
        task_id: TaskId,
        duration: Duration,
        exit_code: Option<i32>,
        artifact_count: usize,
    ) -> Self {
        Event::TaskCompleted {
            run_id,
            task_id,
            duration,
            exit_code,
            artifact_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(
        run_id: RunId,
        task_id: TaskId,
        error: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    ) -> Self {
        Event::TaskFailed {
            run_id,
            task_id,
            error,
            exit_code,
            stderr,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSkipped event.
    pub fn task_skipped(run_id: RunId, task_id: TaskId) -> Self {
        Event::TaskSkipped {
            run_id,
            task_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunCompleted event.
    pub fn run_completed(run_id: RunId, graph_id: GraphId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            graph_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create an ArtifactPublished event.
    pub fn artifact_published(run_id: RunId, artifact: ArtifactId, destination: PathBuf) -> Self {
        Event::ArtifactPublished {
            run_id,
            artifact,
            destination,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
