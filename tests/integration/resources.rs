//! Resource contention integration tests.
//!
//! Verifies that concurrently running tasks never exceed host capacity and
//! that independent tasks do run in parallel when capacity allows.

use std::time::Duration;
use tempfile::TempDir;
use vessel::core::resource::GIB;
use vessel::testing::{MockRuntime, TestHarness};
use vessel::{
    ArtifactKind, GraphBuilder, HostCapacity, ParameterSet, PipelineError, TaskGraph, TaskSpec,
};

/// `count` independent tasks, each asking for `cpus` cores and 1GiB.
fn fan_out(count: usize, cpus: u32) -> TaskGraph {
    let mut builder = GraphBuilder::new("fan-out");
    for i in 0..count {
        builder = builder.task(
            TaskSpec::container(format!("shard-{}", i), "img", "work > out.txt")
                .cpu(cpus)
                .memory(GIB)
                .output("out", ArtifactKind::File, "out.txt"),
        );
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new().with_delay(Duration::from_millis(50)),
        HostCapacity::new(8, 16 * GIB, 100 * GIB),
    )
    .await;

    let report = harness.run(fan_out(4, 2), &ParameterSet::new()).await.unwrap();

    assert_eq!(report.task_results.len(), 4);
    assert_eq!(harness.runtime().max_concurrency(), 4);
}

#[tokio::test]
async fn test_cpu_capacity_limits_concurrency() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new().with_delay(Duration::from_millis(30)),
        HostCapacity::new(4, 64 * GIB, 100 * GIB),
    )
    .await;

    let report = harness.run(fan_out(6, 2), &ParameterSet::new()).await.unwrap();

    assert_eq!(report.task_results.len(), 6);
    assert!(harness.runtime().max_concurrency() <= 2);
}

#[tokio::test]
async fn test_memory_capacity_limits_concurrency() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new().with_delay(Duration::from_millis(30)),
        HostCapacity::new(64, GIB, 100 * GIB),
    )
    .await;

    harness.run(fan_out(3, 1), &ParameterSet::new()).await.unwrap();

    assert_eq!(harness.runtime().max_concurrency(), 1);
}

#[tokio::test]
async fn test_reservations_released_after_run() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new(),
        HostCapacity::new(4, 8 * GIB, 8 * GIB),
    )
    .await;

    harness.run(fan_out(5, 3), &ParameterSet::new()).await.unwrap();

    assert_eq!(harness.executor().pool().in_use(), (0, 0, 0));
}

#[tokio::test]
async fn test_oversized_task_rejected_before_anything_runs() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new(),
        HostCapacity::new(4, 8 * GIB, 8 * GIB),
    )
    .await;

    let graph = GraphBuilder::new("too-big")
        .task(TaskSpec::container("small", "img", "true").cpu(1))
        .task(TaskSpec::container("huge", "img", "true").cpu(1).memory(32 * GIB))
        .build()
        .unwrap();

    let err = harness.run(graph, &ParameterSet::new()).await.unwrap_err();

    assert!(matches!(
        &err,
        PipelineError::InsufficientResources { task_id, .. } if task_id.as_str() == "huge"
    ));
    assert!(harness.runtime().invocations().is_empty());
}

#[tokio::test]
async fn test_fan_in_waits_for_all_producers_under_contention() {
    let tmp = TempDir::new().unwrap();
    let harness = TestHarness::with_runtime(
        tmp.path(),
        MockRuntime::new()
            .delay_task("shard-0", Duration::from_millis(60))
            .delay_task("shard-1", Duration::from_millis(5))
            .delay_task("shard-2", Duration::from_millis(30)),
        HostCapacity::new(2, 8 * GIB, 100 * GIB),
    )
    .await;

    let mut builder = GraphBuilder::new("fan-in");
    let mut merge = TaskSpec::container("merge", "img", "cat {s0} {s1} {s2} > all.txt")
        .cpu(1)
        .output("all", ArtifactKind::File, "all.txt");
    for i in 0..3 {
        let shard = format!("shard-{}", i);
        builder = builder.task(
            TaskSpec::container(shard.as_str(), "img", "work > out.txt")
                .cpu(1)
                .output("out", ArtifactKind::File, "out.txt"),
        );
        merge = merge.artifact(format!("s{}", i), shard.as_str(), "out", ArtifactKind::File);
    }
    let graph = builder.task(merge).build().unwrap();

    harness.run(graph, &ParameterSet::new()).await.unwrap();

    let mut before = harness.runtime().finished_before("merge");
    before.sort();
    assert_eq!(before, vec!["shard-0", "shard-1", "shard-2"]);
    assert!(harness.runtime().max_concurrency() <= 2);
}
