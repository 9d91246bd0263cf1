//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use vessel::events::EventBus;
use vessel::pipeline::{PipelineRunner, RnaSeqParams};
use vessel::testing::{MockFetcher, MockRuntime, RecordingHandler, RecordingPublisher};
use vessel::{GraphExecutor, HostCapacity, Publisher, TaskExecutor, Workspace};

pub const TOOL_IMAGE: &str = "quay.io/example/rnaseq-tools:1.0";

/// A pipeline runner wired to test doubles.
pub struct Fixture {
    pub runner: PipelineRunner,
    pub runtime: Arc<MockRuntime>,
    pub fetcher: Arc<MockFetcher>,
    pub publisher: Arc<RecordingPublisher>,
    pub events: Arc<RecordingHandler>,
}

impl Fixture {
    /// Unbounded capacity, recording publisher.
    pub async fn new(root: &Path) -> Self {
        Self::with(root, MockRuntime::new(), MockFetcher::new(), HostCapacity::unbounded()).await
    }

    pub async fn with(
        root: &Path,
        runtime: MockRuntime,
        fetcher: MockFetcher,
        capacity: HostCapacity,
    ) -> Self {
        let publisher = Arc::new(RecordingPublisher::new());
        Self::with_publisher(root, runtime, fetcher, capacity, publisher.clone(), publisher).await
    }

    /// Publish through `publisher`; `recorder` is what the fixture exposes.
    pub async fn with_publisher(
        root: &Path,
        runtime: MockRuntime,
        fetcher: MockFetcher,
        capacity: HostCapacity,
        publisher: Arc<dyn Publisher>,
        recorder: Arc<RecordingPublisher>,
    ) -> Self {
        let runtime = Arc::new(runtime);
        let fetcher = Arc::new(fetcher);
        let events = Arc::new(RecordingHandler::new());
        let bus = Arc::new(EventBus::new());
        bus.register(events.clone()).await;

        let task_executor = TaskExecutor::new(runtime.clone()).with_fetcher(fetcher.clone());
        let executor = GraphExecutor::new(task_executor, capacity, Workspace::new(root.join("runs")))
            .with_event_bus(bus);

        Self {
            runner: PipelineRunner::new(executor, publisher),
            runtime,
            fetcher,
            publisher: recorder,
            events,
        }
    }
}

/// RNA-seq parameters publishing under `out`.
pub fn rnaseq_params(out: &Path) -> RnaSeqParams {
    RnaSeqParams {
        sra_acc: "SRR000001".to_string(),
        reference_genome_url: "https://example.org/genomes/chr1.fa.gz".to_string(),
        output_prefix: format!("{}/", out.display()),
    }
}
