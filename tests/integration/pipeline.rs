//! RNA-seq pipeline integration tests.
//!
//! Runs the full five-stage pipeline against the mock runtime and fetcher.

use crate::common::{Fixture, TOOL_IMAGE, rnaseq_params};
use std::path::PathBuf;
use tempfile::TempDir;
use vessel::pipeline::{ALIGN, COUNT, FETCH, INDEX, RnaSeqPipeline, SORT};
use vessel::{ArtifactId, Event, TaskId};

#[tokio::test]
async fn test_rnaseq_runs_stages_in_order_and_publishes() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;
    let params = rnaseq_params(&tmp.path().join("out"));

    let summary = fixture
        .runner
        .run_rnaseq(&RnaSeqPipeline::new(TOOL_IMAGE), &params)
        .await
        .unwrap();

    // fetch is not a container task, so the runtime sees four commands
    assert_eq!(fixture.runtime.started_order(), vec![INDEX, ALIGN, SORT, COUNT]);
    assert_eq!(
        fixture.fetcher.urls(),
        vec!["https://example.org/genomes/chr1.fa.gz"]
    );

    let order: Vec<&str> = summary.tasks.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(order, vec![FETCH, INDEX, ALIGN, SORT, COUNT]);

    let expected = PathBuf::from(format!("{}abundance.txt", params.output_prefix));
    assert_eq!(summary.published.as_ref(), Some(&expected));
    assert_eq!(
        fixture.publisher.copies(),
        vec![(ArtifactId::new(TaskId::new(COUNT), 1), expected)]
    );
}

#[tokio::test]
async fn test_commands_reference_upstream_artifacts() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;

    let summary = fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap();

    let genome = summary
        .artifacts
        .iter()
        .find(|a| a.id == "fetch#0")
        .map(|a| a.path.display().to_string())
        .unwrap();
    let index = fixture.runtime.invocation(INDEX).unwrap();
    assert_eq!(index.image, TOOL_IMAGE);
    assert!(index.command.contains(&genome), "{}", index.command);

    let align = fixture.runtime.invocation(ALIGN).unwrap();
    assert!(align.command.contains("--sra-acc SRR000001"));
    assert!(align.command.contains("/index/genome"));

    let count = fixture.runtime.invocation(COUNT).unwrap();
    assert!(count.command.contains("sorted.bam"));
    assert!(!count.command.contains("{bam}"));
}

#[tokio::test]
async fn test_every_container_shares_the_run_workspace_mount() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;

    let summary = fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap();

    for invocation in fixture.runtime.invocations() {
        assert_eq!(invocation.mounts, vec![summary.workspace.clone()]);
        assert!(invocation.work_dir.starts_with(&summary.workspace));
    }
}

#[tokio::test]
async fn test_lifecycle_events() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;

    fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap();

    let events = fixture.events.events().await;
    assert!(matches!(events.first(), Some(Event::RunStarted { task_count: 5, .. })));
    assert_eq!(
        fixture.events.started_tasks().await,
        vec![FETCH, INDEX, ALIGN, SORT, COUNT]
    );
    let completed = events
        .iter()
        .filter(|e| matches!(e, Event::TaskCompleted { .. }))
        .count();
    assert_eq!(completed, 5);
    assert!(events.iter().any(|e| matches!(e, Event::RunCompleted { success: true, .. })));
    assert!(matches!(events.last(), Some(Event::ArtifactPublished { .. })));
}

#[tokio::test]
async fn test_summary_serializes_to_json() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;

    let summary = fixture
        .runner
        .run_rnaseq(
            &RnaSeqPipeline::new(TOOL_IMAGE),
            &rnaseq_params(&tmp.path().join("out")),
        )
        .await
        .unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["graph_id"], "rnaseq");
    assert_eq!(json["tasks"].as_array().unwrap().len(), 5);
    assert_eq!(json["tasks"][0]["task_id"], "fetch");
    assert!(json["published"].as_str().unwrap().ends_with("abundance.txt"));
}

#[tokio::test]
async fn test_reference_invocation_publishes_to_out() {
    let tmp = TempDir::new().unwrap();
    let fixture = Fixture::new(tmp.path()).await;
    let params = vessel::RnaSeqParams {
        sra_acc: "SRR000001".into(),
        reference_genome_url: "http://example/genome.fa.gz".into(),
        output_prefix: "/out/".into(),
    };

    let summary = fixture
        .runner
        .run_rnaseq(&RnaSeqPipeline::new(TOOL_IMAGE), &params)
        .await
        .unwrap();

    assert_eq!(summary.tasks.len(), 5);
    assert_eq!(summary.published, Some(PathBuf::from("/out/abundance.txt")));
    let copies = fixture.publisher.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].1, PathBuf::from("/out/abundance.txt"));
}
