//! Single-task execution.
//!
//! The `TaskExecutor` takes one ready task through its whole life:
//! - Resolve each input slot to a parameter value or an upstream artifact path
//! - Render the command (or fetch URL) template
//! - Run it through the container runtime or fetcher, under a timeout
//! - Check the exit status and collect declared outputs as artifacts
//!
//! Resource reservation and ordering are the graph executor's concern. There
//! is no retry: the first failure is final.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use crate::core::artifact::{Artifact, ArtifactId, ArtifactLocation, ArtifactStore};
use crate::core::environment::Environment;
use crate::core::graph::TaskGraph;
use crate::core::param::BoundParameters;
use crate::core::task::{InputSource, TaskAction, TaskFailure, TaskSpec};
use crate::core::template::Quoting;
use crate::core::types::{RunId, TaskId};

use super::fetch::{Fetcher, HttpFetcher};
use super::runtime::{
    CapturedOutput, ContainerInvocation, ContainerRuntime, RuntimeError, capture_outputs,
};
use super::workspace::RunWorkspace;

/// Result of a successfully executed task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// The task that was executed.
    pub task_id: TaskId,
    /// Wall time of the command or fetch.
    pub duration: Duration,
    /// Rendered command, or the resolved URL for fetch tasks.
    pub command: String,
    /// Exit code of the command; `None` for fetch tasks.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Produced artifacts in output order.
    pub artifacts: Vec<Artifact>,
}

/// What a task needs from its run.
#[derive(Clone)]
pub struct TaskContext {
    pub run_id: RunId,
    pub graph: Arc<TaskGraph>,
    pub params: BoundParameters,
    pub artifacts: ArtifactStore,
    pub workspace: RunWorkspace,
}

impl TaskContext {
    /// Resolve every input slot of a task to its textual value.
    ///
    /// Parameters render with their display form, artifacts as their
    /// absolute path.
    pub fn resolve_inputs(&self, spec: &TaskSpec) -> Result<HashMap<String, String>, TaskFailure> {
        let mut values = HashMap::with_capacity(spec.inputs.len());
        for input in &spec.inputs {
            let missing = || TaskFailure::MissingInput(input.slot.clone());
            let value = match &input.source {
                InputSource::Param(name) => self.params.get(name).ok_or_else(missing)?.to_string(),
                InputSource::Output { task, output } => {
                    let index = self.graph.output_index(task, output).ok_or_else(missing)?;
                    let artifact = self.artifacts.get(task, index).ok_or_else(missing)?;
                    artifact.location.path().display().to_string()
                }
            };
            values.insert(input.slot.clone(), value);
        }
        Ok(values)
    }
}

/// Executor for a single task.
pub struct TaskExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: Arc<dyn Fetcher>,
    environment: Environment,
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Create an executor running containers through `runtime` and fetching
    /// over HTTP.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            fetcher: Arc::new(HttpFetcher::new()),
            environment: Environment::new(),
            default_timeout: None,
        }
    }

    /// Builder: replace the fetch capability.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Builder: environment applied to every task, under each task's own.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Builder: timeout for tasks that do not declare one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Name of the underlying runtime.
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Run one task whose inputs are all available.
    pub async fn execute(
        &self,
        spec: &TaskSpec,
        ctx: &TaskContext,
    ) -> Result<TaskResult, TaskFailure> {
        let work_dir = ctx.workspace.task_dir(&spec.id).await?;
        let values = ctx.resolve_inputs(spec)?;
        let limit = spec.timeout.or(self.default_timeout);
        let start = Instant::now();

        let (command, exit_code, stdout, stderr, captured) = match &spec.action {
            TaskAction::Container { image, command } => {
                let rendered = command.render(&values, Quoting::Shell)?;
                let invocation = ContainerInvocation {
                    run_id: ctx.run_id,
                    task_id: spec.id.clone(),
                    image: image.clone(),
                    command: rendered.clone(),
                    resources: spec.resources,
                    work_dir: work_dir.clone(),
                    mounts: vec![ctx.workspace.path().to_path_buf()],
                    environment: self.environment.merged_with(&spec.environment),
                    outputs: spec.outputs.clone(),
                    timeout: limit,
                };
                debug!(task = %spec.id, command = %rendered, "running command");

                // The runtime enforces `limit` itself.
                let outcome = self
                    .runtime
                    .run(&invocation)
                    .await
                    .map_err(|e| match e {
                        RuntimeError::Timeout(limit) => TaskFailure::Timeout(limit),
                        other => TaskFailure::Runtime(other.to_string()),
                    })?;

                if !outcome.success() {
                    return Err(TaskFailure::NonZeroExit {
                        code: outcome.exit_code,
                        stderr: outcome.stderr,
                    });
                }
                (
                    rendered,
                    Some(outcome.exit_code),
                    outcome.stdout,
                    outcome.stderr,
                    outcome.outputs,
                )
            }
            TaskAction::Fetch { url } => {
                let url = url.render(&values, Quoting::Raw)?;
                let destination = work_dir.join(&spec.outputs[0].path);
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                debug!(task = %spec.id, url = %url, "fetching");

                let bytes = with_timeout(limit, self.fetcher.fetch(&url, &destination))
                    .await?
                    .map_err(|e| TaskFailure::Fetch(e.to_string()))?;
                debug!(task = %spec.id, bytes, "fetched");

                let captured = capture_outputs(&work_dir, &spec.outputs);
                (url, None, String::new(), String::new(), captured)
            }
        };

        let artifacts = collect_artifacts(&spec.id, captured)?;
        Ok(TaskResult {
            task_id: spec.id.clone(),
            duration: start.elapsed(),
            command,
            exit_code,
            stdout,
            stderr,
            artifacts,
        })
    }
}

async fn with_timeout<F: Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, TaskFailure> {
    match limit {
        Some(duration) => timeout(duration, fut)
            .await
            .map_err(|_| TaskFailure::Timeout(duration)),
        None => Ok(fut.await),
    }
}

fn collect_artifacts(
    task: &TaskId,
    captured: Vec<CapturedOutput>,
) -> Result<Vec<Artifact>, TaskFailure> {
    captured
        .into_iter()
        .enumerate()
        .map(|(index, output)| {
            if !output.present {
                return Err(TaskFailure::MissingOutput {
                    name: output.name,
                    kind: output.kind,
                    path: output.path,
                });
            }
            Ok(Artifact {
                id: ArtifactId::new(task.clone(), index),
                name: output.name,
                kind: output.kind,
                location: ArtifactLocation::new(output.path),
            })
        })
        .collect()
}
