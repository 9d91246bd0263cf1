//! Graph execution engine.
//!
//! The `GraphExecutor` runs a validated [`TaskGraph`] against a parameter
//! set. Scheduling is event driven: a task is spawned as soon as the last of
//! its producers completes, then waits in the [`ResourcePool`] until its
//! CPU, memory and disk reservation fits. Independent tasks therefore run
//! concurrently up to the host capacity.
//!
//! On the first failure no further task is launched. Tasks already running
//! finish, tasks queued for resources are skipped, and the run returns
//! [`PipelineError::TaskExecutionFailed`] for the failing task.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::artifact::{Artifact, ArtifactStore};
use crate::core::graph::TaskGraph;
use crate::core::param::ParameterSet;
use crate::core::resource::HostCapacity;
use crate::core::task::{TaskFailure, TaskSpec};
use crate::core::types::{GraphId, RunId, TaskId};
use crate::error::PipelineError;
use crate::events::{Event, EventBus};

use super::executor::{TaskContext, TaskExecutor, TaskResult};
use super::pool::{PoolError, ResourcePool};
use super::workspace::Workspace;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub graph_id: GraphId,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Run directory holding every task's working directory.
    pub workspace: PathBuf,
    /// Task results in completion order.
    pub task_results: Vec<TaskResult>,
    artifacts: ArtifactStore,
    graph: Arc<TaskGraph>,
}

impl RunReport {
    /// Look up a produced artifact by task and output name.
    pub fn artifact(&self, task: &TaskId, output: &str) -> Option<Artifact> {
        let index = self.graph.output_index(task, output)?;
        self.artifacts.get(task, index)
    }

    /// All produced artifacts keyed by `(task, output index)`.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.snapshot().into_values().collect()
    }

    /// Order in which tasks completed.
    pub fn completion_order(&self) -> Vec<&TaskId> {
        self.task_results.iter().map(|r| &r.task_id).collect()
    }

    /// Get the result for a specific task.
    pub fn task_result(&self, task: &TaskId) -> Option<&TaskResult> {
        self.task_results.iter().find(|r| &r.task_id == task)
    }
}

enum Outcome {
    Finished(Result<TaskResult, TaskFailure>),
    Skipped,
}

/// Executor for running task graphs under a resource budget.
pub struct GraphExecutor {
    task_executor: Arc<TaskExecutor>,
    pool: ResourcePool,
    workspace: Workspace,
    event_bus: Option<Arc<EventBus>>,
}

impl GraphExecutor {
    /// Create a graph executor.
    pub fn new(task_executor: TaskExecutor, capacity: HostCapacity, workspace: Workspace) -> Self {
        Self {
            task_executor: Arc::new(task_executor),
            pool: ResourcePool::new(capacity),
            workspace,
            event_bus: None,
        }
    }

    /// Builder: emit lifecycle events on this bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Get the event bus, if any.
    pub fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    /// Get the resource pool.
    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Name of the container runtime tasks run on.
    pub fn runtime_name(&self) -> &str {
        self.task_executor.runtime_name()
    }

    /// Root directory for run workspaces.
    pub fn workspace_root(&self) -> &Path {
        self.workspace.root()
    }

    /// Execute a graph.
    ///
    /// Parameters are bound and every task's request is checked against
    /// capacity before anything runs, so those errors never leave partial
    /// results behind.
    pub async fn execute(
        &self,
        graph: Arc<TaskGraph>,
        params: &ParameterSet,
    ) -> Result<RunReport, PipelineError> {
        let params = params.bind(graph.params())?;

        for spec in graph.tasks() {
            self.pool
                .check(&spec.resources)
                .map_err(|PoolError::Insufficient { requested, capacity }| {
                    PipelineError::InsufficientResources {
                        task_id: spec.id.clone(),
                        requested,
                        capacity,
                    }
                })?;
        }

        let run_id = RunId::new();
        let run_workspace = self
            .workspace
            .create_run(run_id)
            .await
            .map_err(PipelineError::Workspace)?;

        let ctx = TaskContext {
            run_id,
            graph: Arc::clone(&graph),
            params,
            artifacts: ArtifactStore::new(),
            workspace: run_workspace,
        };

        let span = info_span!(
            "graph_execution",
            graph = %graph.id(),
            run = %run_id,
            task_count = graph.len(),
        );
        self.run(ctx).instrument(span).await
    }

    async fn run(&self, ctx: TaskContext) -> Result<RunReport, PipelineError> {
        let graph = Arc::clone(&ctx.graph);
        let run_id = ctx.run_id;
        let started_at = Utc::now();
        let start = Instant::now();

        info!(workspace = %ctx.workspace.path().display(), "starting run");
        self.emit(Event::run_started(run_id, graph.id().clone(), graph.len()))
            .await;

        let mut launched: HashSet<TaskId> = HashSet::new();
        let mut waiting_on: HashMap<TaskId, usize> = graph
            .tasks()
            .map(|t| (t.id.clone(), graph.dependencies(&t.id).len()))
            .collect();

        let halted = Arc::new(AtomicBool::new(false));
        let mut running: JoinSet<(TaskId, Outcome)> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, TaskId> = HashMap::new();
        let mut results: Vec<TaskResult> = Vec::new();
        let mut first_failure: Option<(TaskId, TaskFailure)> = None;

        for spec in graph.tasks().filter(|t| waiting_on[&t.id] == 0) {
            self.spawn(spec, &ctx, &halted, &mut running, &mut spawned);
            launched.insert(spec.id.clone());
        }

        while let Some(joined) = running.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((tokio_id, (task_id, outcome))) => {
                    spawned.remove(&tokio_id);
                    (task_id, outcome)
                }
                Err(e) => {
                    let task_id = spawned
                        .remove(&e.id())
                        .unwrap_or_else(|| TaskId::new("unknown"));
                    let failure = TaskFailure::Runtime(format!("task panicked: {}", e));
                    (task_id, Outcome::Finished(Err(failure)))
                }
            };

            match outcome {
                Outcome::Finished(Ok(result)) => {
                    debug!(
                        task = %task_id,
                        duration_ms = %result.duration.as_millis(),
                        "task completed"
                    );
                    for artifact in &result.artifacts {
                        if let Err(e) = ctx.artifacts.record(artifact.clone()) {
                            warn!(task = %task_id, error = %e, "artifact not recorded");
                        }
                    }
                    self.emit(Event::task_completed(
                        run_id,
                        task_id.clone(),
                        result.duration,
                        result.exit_code,
                        result.artifacts.len(),
                    ))
                    .await;
                    results.push(result);

                    if halted.load(Ordering::SeqCst) {
                        continue;
                    }
                    for next in graph.downstream(&task_id) {
                        let remaining = waiting_on.entry(next.clone()).or_insert(0);
                        *remaining = remaining.saturating_sub(1);
                        if *remaining == 0
                            && let Some(spec) = graph.task(&next)
                        {
                            debug!(task = %next, after = %task_id, "dispatching ready task");
                            self.spawn(spec, &ctx, &halted, &mut running, &mut spawned);
                            launched.insert(next);
                        }
                    }
                }
                Outcome::Finished(Err(failure)) => {
                    warn!(task = %task_id, error = %failure, "task failed");
                    halted.store(true, Ordering::SeqCst);
                    let stderr = match &failure {
                        TaskFailure::NonZeroExit { stderr, .. } => Some(stderr.clone()),
                        _ => None,
                    };
                    self.emit(Event::task_failed(
                        run_id,
                        task_id.clone(),
                        failure.to_string(),
                        failure.exit_status(),
                        stderr,
                    ))
                    .await;
                    if first_failure.is_none() {
                        first_failure = Some((task_id, failure));
                    }
                }
                Outcome::Skipped => {
                    self.emit(Event::task_skipped(run_id, task_id)).await;
                }
            }
        }

        // Anything never spawned was blocked behind the failure.
        for spec in graph.tasks() {
            if !launched.contains(&spec.id) {
                self.emit(Event::task_skipped(run_id, spec.id.clone())).await;
            }
        }

        let duration = start.elapsed();
        let success = first_failure.is_none();
        info!(
            success,
            duration_ms = %duration.as_millis(),
            completed = results.len(),
            "run finished"
        );
        self.emit(Event::run_completed(run_id, graph.id().clone(), success, duration))
            .await;

        if let Some((task_id, failure)) = first_failure {
            return Err(PipelineError::task_failed(task_id, failure));
        }

        Ok(RunReport {
            run_id,
            graph_id: graph.id().clone(),
            started_at,
            duration,
            workspace: ctx.workspace.path().to_path_buf(),
            task_results: results,
            artifacts: ctx.artifacts,
            graph,
        })
    }

    fn spawn(
        &self,
        spec: &Arc<TaskSpec>,
        ctx: &TaskContext,
        halted: &Arc<AtomicBool>,
        running: &mut JoinSet<(TaskId, Outcome)>,
        spawned: &mut HashMap<tokio::task::Id, TaskId>,
    ) {
        let spec = Arc::clone(spec);
        let ctx = ctx.clone();
        let halted = Arc::clone(halted);
        let pool = self.pool.clone();
        let executor = Arc::clone(&self.task_executor);
        let bus = self.event_bus.clone();
        let task_id = spec.id.clone();

        let task_span = info_span!("task", task = %task_id);
        let handle = running.spawn(
            async move {
                // Capacity was checked up front, so this only waits.
                let reservation = match pool.reserve(&spec.resources).await {
                    Ok(reservation) => reservation,
                    Err(e) => {
                        let failure = TaskFailure::Runtime(e.to_string());
                        return (spec.id.clone(), Outcome::Finished(Err(failure)));
                    }
                };
                if halted.load(Ordering::SeqCst) {
                    debug!("skipping, run halted");
                    return (spec.id.clone(), Outcome::Skipped);
                }

                if let Some(bus) = &bus {
                    bus.emit(Event::task_started(ctx.run_id, spec.id.clone()))
                        .await;
                }
                debug!(resources = %spec.resources, "task started");

                let result = executor.execute(&spec, &ctx).await;
                drop(reservation);
                (spec.id.clone(), Outcome::Finished(result))
            }
            .instrument(task_span),
        );
        spawned.insert(handle.id(), task_id);
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}
