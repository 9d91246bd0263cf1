//! Publishing integration tests.
//!
//! Runs pipelines through the real `LocalPublisher`.

use crate::common::{Fixture, TOOL_IMAGE, rnaseq_params};
use std::sync::Arc;
use tempfile::TempDir;
use vessel::pipeline::{PublishRequest, RnaSeqPipeline};
use vessel::testing::{MockFetcher, MockRuntime, RecordingPublisher};
use vessel::{
    ArtifactKind, Destination, GraphBuilder, HostCapacity, LocalPublisher, ParameterSet,
    PipelineError, PublishError, TaskSpec,
};

async fn local_fixture(tmp: &TempDir) -> Fixture {
    Fixture::with_publisher(
        tmp.path(),
        MockRuntime::new(),
        MockFetcher::new(),
        HostCapacity::unbounded(),
        Arc::new(LocalPublisher::new()),
        Arc::new(RecordingPublisher::new()),
    )
    .await
}

#[tokio::test]
async fn test_abundance_copied_to_prefix() {
    let tmp = TempDir::new().unwrap();
    let fixture = local_fixture(&tmp).await;
    let out = tmp.path().join("results").join("sample-1");

    let summary = fixture
        .runner
        .run_rnaseq(&RnaSeqPipeline::new(TOOL_IMAGE), &rnaseq_params(&out))
        .await
        .unwrap();

    let published = out.join("abundance.txt");
    assert_eq!(summary.published.as_deref(), Some(published.as_path()));
    // The mock runtime writes each task's command into its file outputs.
    let content = std::fs::read_to_string(&published).unwrap();
    assert!(content.starts_with("samtools flagstat "), "{}", content);
    assert!(content.contains("> abundance.txt"));
}

#[tokio::test]
async fn test_rerun_overwrites_published_file() {
    let tmp = TempDir::new().unwrap();
    let fixture = local_fixture(&tmp).await;
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("abundance.txt"), "stale").unwrap();

    fixture
        .runner
        .run_rnaseq(&RnaSeqPipeline::new(TOOL_IMAGE), &rnaseq_params(&out))
        .await
        .unwrap();

    assert_ne!(std::fs::read_to_string(out.join("abundance.txt")).unwrap(), "stale");
}

#[tokio::test]
async fn test_publish_any_file_output() {
    let tmp = TempDir::new().unwrap();
    let fixture = local_fixture(&tmp).await;
    let graph = GraphBuilder::new("report")
        .task(
            TaskSpec::container("render", "img", "render > report.html")
                .output("report", ArtifactKind::File, "report.html"),
        )
        .build()
        .unwrap();
    let prefix = format!("{}/site/", tmp.path().display());
    let request = PublishRequest::new(
        "render",
        "report",
        Destination::new(prefix, "index.html").unwrap(),
    );

    let summary = fixture
        .runner
        .run(Arc::new(graph), &ParameterSet::new(), Some(&request))
        .await
        .unwrap();

    assert_eq!(summary.published, Some(tmp.path().join("site").join("index.html")));
    assert!(tmp.path().join("site/index.html").is_file());
}

#[tokio::test]
async fn test_directory_output_cannot_be_published() {
    let tmp = TempDir::new().unwrap();
    let fixture = local_fixture(&tmp).await;
    let graph = GraphBuilder::new("dir")
        .task(TaskSpec::container("build", "img", "mkdir idx").output("idx", ArtifactKind::Dir, "idx"))
        .build()
        .unwrap();
    let request = PublishRequest::new(
        "build",
        "idx",
        Destination::new(format!("{}/", tmp.path().display()), "idx").unwrap(),
    );

    let err = fixture
        .runner
        .run(Arc::new(graph), &ParameterSet::new(), Some(&request))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Publish(PublishError::NotAFile(_))));
    assert!(fixture.runtime.invocations().is_empty());
}
