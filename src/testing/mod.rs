//! Testing utilities for users of the vessel library.
//!
//! Test doubles for every external capability, so graphs can be executed
//! end to end without a container engine or network:
//!
//! - [`MockRuntime`]: creates declared outputs, records invocations and timing
//! - [`MockFetcher`]: writes canned content instead of downloading
//! - [`RecordingPublisher`]: records publish requests without copying
//! - [`RecordingHandler`]: collects lifecycle events
//! - [`TestHarness`]: a [`GraphExecutor`] wired to all of the above

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::artifact::{Artifact, ArtifactId, ArtifactKind};
use crate::core::graph::TaskGraph;
use crate::core::param::ParameterSet;
use crate::core::resource::HostCapacity;
use crate::core::types::TaskId;
use crate::error::PipelineError;
use crate::events::{Event, EventBus, EventHandler};
use crate::execution::{
    ContainerInvocation, ContainerRuntime, FetchError, Fetcher, GraphExecutor, RunReport,
    RuntimeError, RuntimeOutcome, TaskExecutor, Workspace, capture_outputs,
};
use crate::publish::{PublishError, Publisher};

#[derive(Debug, Default)]
struct MockState {
    invocations: Vec<ContainerInvocation>,
    started: Vec<TaskId>,
    finished: Vec<TaskId>,
    finished_at_start: HashMap<TaskId, Vec<TaskId>>,
    active: usize,
    max_active: usize,
}

/// A container runtime that pretends every command succeeds.
///
/// Each run writes the rendered command into every declared file output and
/// creates every declared directory output, unless told otherwise. A delay
/// longer than the invocation's timeout ends in [`RuntimeError::Timeout`].
///
/// # Example
///
/// ```
/// use vessel::testing::MockRuntime;
/// use std::time::Duration;
///
/// let runtime = MockRuntime::new()
///     .with_delay(Duration::from_millis(10))
///     .fail_task("align", 1)
///     .omit_output("count", "summary");
/// assert!(runtime.started_order().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MockRuntime {
    failures: HashMap<TaskId, i32>,
    omitted: HashSet<(TaskId, String)>,
    delays: HashMap<TaskId, Duration>,
    default_delay: Duration,
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: sleep this long in every run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Builder: sleep this long when running one task.
    pub fn delay_task(mut self, task: impl Into<TaskId>, delay: Duration) -> Self {
        self.delays.insert(task.into(), delay);
        self
    }

    /// Builder: make a task exit with `code` and produce nothing.
    pub fn fail_task(mut self, task: impl Into<TaskId>, code: i32) -> Self {
        self.failures.insert(task.into(), code);
        self
    }

    /// Builder: succeed but leave one declared output unwritten.
    pub fn omit_output(mut self, task: impl Into<TaskId>, output: impl Into<String>) -> Self {
        self.omitted.insert((task.into(), output.into()));
        self
    }

    /// All invocations, in start order.
    pub fn invocations(&self) -> Vec<ContainerInvocation> {
        self.state.lock().expect("lock poisoned").invocations.clone()
    }

    /// The invocation of one task, if it ran.
    pub fn invocation(&self, task: &str) -> Option<ContainerInvocation> {
        self.invocations()
            .into_iter()
            .find(|i| i.task_id.as_str() == task)
    }

    /// Task ids in the order their commands started.
    pub fn started_order(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        state.started.iter().map(|t| t.to_string()).collect()
    }

    /// Task ids in the order their commands finished.
    pub fn finished(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        state.finished.iter().map(|t| t.to_string()).collect()
    }

    /// Tasks that had finished when `task` started, in finish order.
    pub fn finished_before(&self, task: &str) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .finished_at_start
            .get(&TaskId::new(task))
            .map(|ids| ids.iter().map(|t| t.to_string()).collect())
            .unwrap_or_default()
    }

    /// Highest number of commands observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().expect("lock poisoned").max_active
    }

    fn write_outputs(&self, invocation: &ContainerInvocation) -> std::io::Result<()> {
        for output in &invocation.outputs {
            if self
                .omitted
                .contains(&(invocation.task_id.clone(), output.name.clone()))
            {
                continue;
            }
            let path = invocation.work_dir.join(&output.path);
            match output.kind {
                ArtifactKind::File => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, format!("{}\n", invocation.command))?;
                }
                ArtifactKind::Dir => std::fs::create_dir_all(&path)?,
            }
        }
        Ok(())
    }
}

/// Decrements the active count even if the run future is dropped.
struct ActiveGuard<'a>(&'a Mutex<MockState>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.active -= 1;
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<RuntimeOutcome, RuntimeError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.invocations.push(invocation.clone());
            state.started.push(invocation.task_id.clone());
            let finished = state.finished.clone();
            state
                .finished_at_start
                .insert(invocation.task_id.clone(), finished);
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
        }
        let guard = ActiveGuard(&self.state);

        let delay = self
            .delays
            .get(&invocation.task_id)
            .copied()
            .unwrap_or(self.default_delay);
        if let Some(limit) = invocation.timeout
            && delay > limit
        {
            tokio::time::sleep(limit).await;
            return Err(RuntimeError::Timeout(limit));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let exit_code = match self.failures.get(&invocation.task_id) {
            Some(code) => *code,
            None => {
                self.write_outputs(invocation)
                    .map_err(|e| RuntimeError::Other(e.to_string()))?;
                0
            }
        };

        drop(guard);
        self.state
            .lock()
            .expect("lock poisoned")
            .finished
            .push(invocation.task_id.clone());

        Ok(RuntimeOutcome {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("mock failure in {}", invocation.task_id)
            },
            outputs: capture_outputs(&invocation.work_dir, &invocation.outputs),
        })
    }
}

/// A fetcher that writes canned content.
#[derive(Debug)]
pub struct MockFetcher {
    content: Vec<u8>,
    fail: bool,
    urls: Mutex<Vec<String>>,
}

impl MockFetcher {
    /// Fetch succeeds with a tiny FASTA record.
    pub fn new() -> Self {
        Self::with_content(b">chr1\nACGTACGTACGT\n".to_vec())
    }

    pub fn with_content(content: Vec<u8>) -> Self {
        Self {
            content,
            fail: false,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch fails with HTTP 404.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// URLs requested so far.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("lock poisoned").clone()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        self.urls.lock().expect("lock poisoned").push(url.to_string());
        if self.fail {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        tokio::fs::write(destination, &self.content).await?;
        Ok(self.content.len() as u64)
    }
}

/// A publisher that records requests and copies nothing.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    copies: Mutex<Vec<(ArtifactId, PathBuf)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(artifact, destination)` pairs in request order.
    pub fn copies(&self) -> Vec<(ArtifactId, PathBuf)> {
        self.copies.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn copy(&self, artifact: &Artifact, destination: &Path) -> Result<(), PublishError> {
        self.copies
            .lock()
            .expect("lock poisoned")
            .push((artifact.id.clone(), destination.to_path_buf()));
        Ok(())
    }
}

/// Handler that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Ids of tasks that emitted `TaskStarted`, in order.
    pub async fn started_tasks(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskStarted { task_id, .. } => Some(task_id.to_string()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Runs graphs against the mock runtime and fetcher.
///
/// # Example
///
/// ```no_run
/// use vessel::testing::TestHarness;
/// use vessel::{ArtifactKind, GraphBuilder, ParameterSet, TaskSpec};
///
/// # async fn example() {
/// let harness = TestHarness::new("/tmp/vessel-test").await;
/// let graph = GraphBuilder::new("demo")
///     .task(TaskSpec::container("hello", "img", "echo hi > out").output(
///         "out",
///         ArtifactKind::File,
///         "out",
///     ))
///     .build()
///     .unwrap();
///
/// let report = harness.run(graph, &ParameterSet::new()).await.unwrap();
/// assert_eq!(report.task_results.len(), 1);
/// # }
/// ```
pub struct TestHarness {
    runtime: Arc<MockRuntime>,
    fetcher: Arc<MockFetcher>,
    handler: Arc<RecordingHandler>,
    executor: GraphExecutor,
}

impl TestHarness {
    /// Harness with unbounded capacity and a default [`MockRuntime`].
    pub async fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self::with_runtime(workspace_root, MockRuntime::new(), HostCapacity::unbounded()).await
    }

    /// Harness with a configured runtime and capacity.
    pub async fn with_runtime(
        workspace_root: impl Into<PathBuf>,
        runtime: MockRuntime,
        capacity: HostCapacity,
    ) -> Self {
        let runtime = Arc::new(runtime);
        let fetcher = Arc::new(MockFetcher::new());
        let handler = Arc::new(RecordingHandler::new());
        let bus = Arc::new(EventBus::new());
        bus.register(handler.clone()).await;

        let task_executor = TaskExecutor::new(runtime.clone()).with_fetcher(fetcher.clone());
        let executor = GraphExecutor::new(task_executor, capacity, Workspace::new(workspace_root))
            .with_event_bus(bus);

        Self {
            runtime,
            fetcher,
            handler,
            executor,
        }
    }

    /// Execute a graph.
    pub async fn run(
        &self,
        graph: TaskGraph,
        params: &ParameterSet,
    ) -> Result<RunReport, PipelineError> {
        self.executor.execute(Arc::new(graph), params).await
    }

    pub fn runtime(&self) -> &MockRuntime {
        &self.runtime
    }

    pub fn fetcher(&self) -> &MockFetcher {
        &self.fetcher
    }

    pub fn events(&self) -> &RecordingHandler {
        &self.handler
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }
}
