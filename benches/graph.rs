//! Benchmarks for task graph operations.
//!
//! Measures the overhead of:
//! - Graph construction and validation, strict and deferred
//! - Ready-set computation
//! - Scheduling a graph against the mock runtime

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use vessel::testing::MockRuntime;
use vessel::{
    ArtifactKind, GraphBuilder, GraphExecutor, HostCapacity, ParameterSet, TaskExecutor,
    TaskGraph, TaskId, TaskSpec, Workspace,
};

fn producer(id: &str) -> vessel::TaskSpecBuilder {
    TaskSpec::container(id, "img", "produce > out.txt").output("out", ArtifactKind::File, "out.txt")
}

fn consumer(id: &str, upstream: &[String]) -> vessel::TaskSpecBuilder {
    let slots: Vec<String> = (0..upstream.len()).map(|i| format!("{{in{}}}", i)).collect();
    let mut task = TaskSpec::container(id, "img", format!("cat {} > out.txt", slots.join(" ")))
        .output("out", ArtifactKind::File, "out.txt");
    for (i, up) in upstream.iter().enumerate() {
        task = task.artifact(format!("in{}", i), up.as_str(), "out", ArtifactKind::File);
    }
    task
}

/// Build a linear graph: A -> B -> C -> ... -> N
fn build_linear(size: usize) -> TaskGraph {
    let mut builder = GraphBuilder::new("linear").task(producer("task_0"));
    for i in 1..size {
        builder = builder.task(consumer(&format!("task_{}", i), &[format!("task_{}", i - 1)]));
    }
    builder.build().unwrap()
}

/// Build a linear graph defined leaf first, resolved in deferred mode.
fn build_linear_reversed(size: usize) -> TaskGraph {
    let mut builder = GraphBuilder::new("reversed").allow_forward_references();
    for i in (1..size).rev() {
        builder = builder.task(consumer(&format!("task_{}", i), &[format!("task_{}", i - 1)]));
    }
    builder.task(producer("task_0")).build().unwrap()
}

/// Build a wide graph: one root, many leaves.
fn build_wide(size: usize) -> TaskGraph {
    let root = vec!["root".to_string()];
    let mut builder = GraphBuilder::new("wide").task(producer("root"));
    for i in 0..size {
        builder = builder.task(consumer(&format!("leaf_{}", i), &root));
    }
    builder.build().unwrap()
}

/// Build a diamond graph: start -> [middle...] -> end
fn build_diamond(width: usize) -> TaskGraph {
    let start = vec!["start".to_string()];
    let mut builder = GraphBuilder::new("diamond").task(producer("start"));
    let middle: Vec<String> = (0..width).map(|i| format!("middle_{}", i)).collect();
    for name in &middle {
        builder = builder.task(consumer(name, &start));
    }
    builder.task(consumer("end", &middle)).build().unwrap()
}

fn bench_graph_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_construction");

    for size in [100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("linear", size), size, |b, &size| {
            b.iter(|| build_linear(size));
        });

        group.bench_with_input(BenchmarkId::new("linear_deferred", size), size, |b, &size| {
            b.iter(|| build_linear_reversed(size));
        });

        group.bench_with_input(BenchmarkId::new("wide", size), size, |b, &size| {
            b.iter(|| build_wide(size));
        });

        group.bench_with_input(BenchmarkId::new("diamond", size), size, |b, &size| {
            b.iter(|| build_diamond(size));
        });
    }

    group.finish();
}

fn bench_ready_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_tasks");

    for size in [100, 500].iter() {
        let graph = build_diamond(*size);
        let completed: HashSet<TaskId> = std::iter::once(TaskId::new("start")).collect();
        group.bench_with_input(BenchmarkId::new("diamond", size), &graph, |b, graph| {
            b.iter(|| graph.ready_tasks(&completed));
        });
    }

    group.finish();
}

fn bench_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");
    group.sample_size(10);
    let rt = tokio::runtime::Runtime::new().unwrap();

    for size in [10, 50].iter() {
        let tmp = TempDir::new().unwrap();
        let executor = GraphExecutor::new(
            TaskExecutor::new(Arc::new(MockRuntime::new())),
            HostCapacity::new(8, u64::MAX, u64::MAX),
            Workspace::new(tmp.path()),
        );
        let graph = Arc::new(build_wide(*size));

        group.bench_with_input(BenchmarkId::new("wide", size), &graph, |b, graph| {
            b.to_async(&rt).iter(|| async {
                executor
                    .execute(Arc::clone(graph), &ParameterSet::new())
                    .await
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_graph_construction, bench_ready_tasks, bench_execution);

criterion_main!(benches);
