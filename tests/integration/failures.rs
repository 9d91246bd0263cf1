//! Failure propagation integration tests.
//!
//! A failing task stops the run: nothing downstream launches, nothing is
//! published, and the partial workspace is left for inspection.

use crate::common::{Fixture, TOOL_IMAGE, rnaseq_params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use vessel::pipeline::{ALIGN, COUNT, FETCH, INDEX, RnaSeqPipeline, SORT};
use vessel::testing::{MockFetcher, MockRuntime, TestHarness};
use vessel::{
    Event, GraphBuilder, HostCapacity, ParamError, ParamType, ParameterSet, PipelineError,
    PublishError, TaskFailure, TaskSpec,
};

/// The single run directory under `root/runs`.
fn run_dir(root: &Path) -> PathBuf {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(root.join("runs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);
    entries.remove(0)
}

#[tokio::test]
async fn test_failed_stage_stops_downstream_and_publishes_nothing() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::with(
        tmp.path(),
        MockRuntime::new().fail_task(ALIGN, 3),
        MockFetcher::new(),
        HostCapacity::unbounded(),
    )
    .await;

    let err = fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap_err();

    match &err {
        PipelineError::TaskExecutionFailed {
            task_id,
            exit_status,
            cause,
        } => {
            assert_eq!(task_id.as_str(), ALIGN);
            assert_eq!(*exit_status, Some(3));
            assert!(matches!(cause, TaskFailure::NonZeroExit { code: 3, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(fixture.runtime.started_order(), vec![INDEX, ALIGN]);
    assert!(fixture.publisher.copies().is_empty());

    let events = fixture.events.events().await;
    let skipped: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Event::TaskSkipped { task_id, .. } => Some(task_id.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![SORT, COUNT]);
    assert!(events.iter().any(|e| matches!(e, Event::RunCompleted { success: false, .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::ArtifactPublished { .. })));
}

#[tokio::test]
async fn test_partial_workspace_is_retained() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::with(
        tmp.path(),
        MockRuntime::new().fail_task(SORT, 1),
        MockFetcher::new(),
        HostCapacity::unbounded(),
    )
    .await;

    fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap_err();

    let run = run_dir(tmp.path());
    assert_eq!(
        std::fs::read_to_string(run.join(FETCH).join("genome.fa")).unwrap(),
        ">chr1\nACGTACGTACGT\n"
    );
    assert!(run.join(INDEX).join("index").is_dir());
    assert!(run.join(ALIGN).join("aligned.sam").is_file());
    assert!(!run.join(COUNT).exists());
}

#[tokio::test]
async fn test_missing_declared_output_fails_the_task() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::with(
        tmp.path(),
        MockRuntime::new().omit_output(COUNT, "abundance"),
        MockFetcher::new(),
        HostCapacity::unbounded(),
    )
    .await;

    let err = fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        PipelineError::TaskExecutionFailed {
            exit_status: None,
            cause: TaskFailure::MissingOutput { name, .. },
            ..
        } if name == "abundance"
    ));
    assert!(fixture.publisher.copies().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_stops_the_pipeline() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::with(
        tmp.path(),
        MockRuntime::new(),
        MockFetcher::failing(),
        HostCapacity::unbounded(),
    )
    .await;

    let err = fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.task_id().map(|t| t.as_str()), Some(FETCH));
    assert!(matches!(
        &err,
        PipelineError::TaskExecutionFailed {
            cause: TaskFailure::Fetch(_),
            ..
        }
    ));
    assert!(fixture.runtime.invocations().is_empty());
}

#[tokio::test]
async fn test_bad_output_prefix_rejected_before_running() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;
    let mut params = rnaseq_params(&tmp.path().join("out"));
    params.output_prefix = params.output_prefix.trim_end_matches('/').to_string();

    let err = fixture
        .runner
        .run_rnaseq(&RnaSeqPipeline::new(TOOL_IMAGE), &params)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Publish(PublishError::NotADirectoryPrefix(_))
    ));
    assert!(fixture.fetcher.urls().is_empty());
    assert!(fixture.events.events().await.is_empty());
    assert!(!tmp.path().join("runs").exists());
}

#[tokio::test]
async fn test_missing_parameter_rejected_before_running() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::new(tmp.path()).await;
    let graph = GraphBuilder::new("needs-param")
        .param("sample", ParamType::String)
        .task(TaskSpec::container("echo", "img", "echo {s}").param("s", "sample", ParamType::String))
        .build()
        .unwrap();

    let err = harness.run(graph, &ParameterSet::new()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Binding(ParamError::Missing(name)) if name == "sample"));
    assert!(harness.runtime().invocations().is_empty());
}

#[tokio::test]
async fn test_task_timeout() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new().delay_task("slow", Duration::from_secs(5)),
        HostCapacity::unbounded(),
    )
    .await;
    let graph = GraphBuilder::new("timeout")
        .task(TaskSpec::container("slow", "img", "sleep 5").timeout(Duration::from_millis(50)))
        .build()
        .unwrap();

    let err = harness.run(graph, &ParameterSet::new()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::TaskExecutionFailed {
            cause: TaskFailure::Timeout(limit),
            exit_status: None,
            ..
        } if limit == Duration::from_millis(50)
    ));
}
