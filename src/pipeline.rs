//! The RNA-seq pipeline and the runner that executes and publishes.
//!
//! [`RnaSeqPipeline`] builds a strict five-stage chain:
//!
//! ```text
//! fetch ──genome──▶ index ──index/──▶ align ──sam──▶ sort ──bam──▶ count
//! ```
//!
//! Every stage except `fetch` runs in the same tool image, which is passed in
//! explicitly. `count` produces a summary and an abundance table; the runner
//! publishes the abundance table as `<outputPrefix>abundance.txt`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::artifact::ArtifactKind;
use crate::core::graph::{GraphBuilder, GraphError, TaskGraph};
use crate::core::param::{ParamType, ParameterSet};
use crate::core::resource::{GIB, ResourceRequirements};
use crate::core::task::TaskSpec;
use crate::core::types::{GraphId, RunId, TaskId};
use crate::error::PipelineError;
use crate::events::Event;
use crate::execution::{GraphExecutor, RunReport};
use crate::publish::{Destination, PublishError, Publisher};

pub const FETCH: &str = "fetch";
pub const INDEX: &str = "index";
pub const ALIGN: &str = "align";
pub const SORT: &str = "sort";
pub const COUNT: &str = "count";

/// Name of the published result file.
pub const ABUNDANCE_FILE: &str = "abundance.txt";

/// Parameter names of the RNA-seq graph.
pub const SRA_ACC: &str = "sraAcc";
pub const REFERENCE_GENOME_URL: &str = "referenceGenomeURL";

/// Builder for the RNA-seq task graph.
#[derive(Debug, Clone)]
pub struct RnaSeqPipeline {
    tool_image: String,
    resources: BTreeMap<&'static str, ResourceRequirements>,
}

impl RnaSeqPipeline {
    /// Pipeline running every tool stage in `tool_image`.
    pub fn new(tool_image: impl Into<String>) -> Self {
        let resources = BTreeMap::from([
            (FETCH, stage(1, 1, 10)),
            (INDEX, stage(4, 8, 20)),
            (ALIGN, stage(8, 16, 50)),
            (SORT, stage(4, 8, 50)),
            (COUNT, stage(2, 4, 5)),
        ]);
        Self {
            tool_image: tool_image.into(),
            resources,
        }
    }

    /// Builder: override one stage's resource request. Unknown stages are
    /// ignored.
    pub fn with_resources(mut self, stage: &str, resources: ResourceRequirements) -> Self {
        if let Some(slot) = self.resources.get_mut(stage) {
            *slot = resources;
        }
        self
    }

    /// Builder: scale every stage's CPU request down to at most `cpus`.
    pub fn cap_cpus(mut self, cpus: u32) -> Self {
        for req in self.resources.values_mut() {
            req.cpu_count = req.cpu_count.min(cpus);
        }
        self
    }

    pub fn tool_image(&self) -> &str {
        &self.tool_image
    }

    fn resources(&self, stage: &str) -> ResourceRequirements {
        self.resources.get(stage).copied().unwrap_or_default()
    }

    fn threads(&self, stage: &str) -> u32 {
        self.resources(stage).cpu_count.max(1)
    }

    /// Build the validated graph.
    pub fn build(&self) -> Result<TaskGraph, GraphError> {
        let image = self.tool_image.as_str();

        GraphBuilder::new("rnaseq")
            .param(SRA_ACC, ParamType::String)
            .param(REFERENCE_GENOME_URL, ParamType::String)
            .task(
                TaskSpec::fetch(FETCH, "{url}")
                    .description("download and decompress the reference genome")
                    .resources(self.resources(FETCH))
                    .param("url", REFERENCE_GENOME_URL, ParamType::String)
                    .output("genome", ArtifactKind::File, "genome.fa"),
            )
            .task(
                TaskSpec::container(
                    INDEX,
                    image,
                    format!(
                        "mkdir -p index && hisat2-build -p {} {{genome}} index/genome",
                        self.threads(INDEX)
                    ),
                )
                .description("build the HISAT2 index")
                .resources(self.resources(INDEX))
                .artifact("genome", FETCH, "genome", ArtifactKind::File)
                .output("index", ArtifactKind::Dir, "index"),
            )
            .task(
                TaskSpec::container(
                    ALIGN,
                    image,
                    format!(
                        "hisat2 -p {} -x {{index}}/genome --sra-acc {{sra}} -S aligned.sam",
                        self.threads(ALIGN)
                    ),
                )
                .description("align reads against the index")
                .resources(self.resources(ALIGN))
                .artifact("index", INDEX, "index", ArtifactKind::Dir)
                .param("sra", SRA_ACC, ParamType::String)
                .output("alignment", ArtifactKind::File, "aligned.sam"),
            )
            .task(
                TaskSpec::container(
                    SORT,
                    image,
                    format!(
                        "samtools sort -@ {} -o sorted.bam {{sam}} && samtools index sorted.bam",
                        self.threads(SORT)
                    ),
                )
                .description("sort and index the alignment")
                .resources(self.resources(SORT))
                .artifact("sam", ALIGN, "alignment", ArtifactKind::File)
                .output("bam", ArtifactKind::File, "sorted.bam")
                .output("bai", ArtifactKind::File, "sorted.bam.bai"),
            )
            .task(
                TaskSpec::container(
                    COUNT,
                    image,
                    "samtools flagstat {bam} > summary.txt && samtools idxstats {bam} > abundance.txt",
                )
                .description("summarize the alignment and count reads per reference sequence")
                .resources(self.resources(COUNT))
                .artifact("bam", SORT, "bam", ArtifactKind::File)
                .output("summary", ArtifactKind::File, "summary.txt")
                .output("abundance", ArtifactKind::File, ABUNDANCE_FILE),
            )
            .build()
    }
}

fn stage(cpus: u32, memory_gib: u64, disk_gib: u64) -> ResourceRequirements {
    ResourceRequirements::none()
        .with_cpu(cpus)
        .with_memory(memory_gib * GIB)
        .with_disk(disk_gib * GIB)
}

/// Caller-facing parameters of the RNA-seq workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RnaSeqParams {
    pub sra_acc: String,
    pub reference_genome_url: String,
    /// Directory prefix ending in a path separator.
    pub output_prefix: String,
}

impl RnaSeqParams {
    /// Graph parameters; the output prefix is consumed by the publisher.
    pub fn to_parameter_set(&self) -> ParameterSet {
        ParameterSet::new()
            .with(SRA_ACC, self.sra_acc.as_str())
            .with(REFERENCE_GENOME_URL, self.reference_genome_url.as_str())
    }

    /// Where the abundance table is published.
    pub fn destination(&self) -> Result<Destination, PublishError> {
        Destination::new(self.output_prefix.as_str(), ABUNDANCE_FILE)
    }
}

/// Which artifact to publish after a successful run, and where.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub task: TaskId,
    pub output: String,
    pub destination: Destination,
}

impl PublishRequest {
    pub fn new(task: impl Into<TaskId>, output: impl Into<String>, destination: Destination) -> Self {
        Self {
            task: task.into(),
            output: output.into(),
            destination,
        }
    }

    /// Check the requested output exists and is a file.
    fn validate(&self, graph: &TaskGraph) -> Result<(), PublishError> {
        let unknown = || PublishError::UnknownOutput {
            task: self.task.to_string(),
            output: self.output.clone(),
        };
        let spec = graph.task(&self.task).ok_or_else(unknown)?;
        let output = spec
            .outputs
            .iter()
            .find(|o| o.name == self.output)
            .ok_or_else(unknown)?;
        if output.kind != ArtifactKind::File {
            return Err(PublishError::NotAFile(format!("{}.{}", self.task, self.output)));
        }
        Ok(())
    }
}

/// Serializable summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub graph_id: GraphId,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u128,
    pub workspace: PathBuf,
    pub tasks: Vec<TaskSummary>,
    pub artifacts: Vec<ArtifactSummary>,
    pub published: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub command: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub id: String,
    pub name: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl RunSummary {
    pub fn from_report(report: &RunReport, published: Option<PathBuf>) -> Self {
        Self {
            run_id: report.run_id,
            graph_id: report.graph_id.clone(),
            started_at: report.started_at,
            duration_ms: report.duration.as_millis(),
            workspace: report.workspace.clone(),
            tasks: report
                .task_results
                .iter()
                .map(|r| TaskSummary {
                    task_id: r.task_id.clone(),
                    command: r.command.clone(),
                    exit_code: r.exit_code,
                    duration_ms: r.duration.as_millis(),
                })
                .collect(),
            artifacts: report
                .artifacts()
                .into_iter()
                .map(|a| ArtifactSummary {
                    id: a.id.to_string(),
                    name: a.name,
                    kind: a.kind,
                    path: a.location.path().to_path_buf(),
                })
                .collect(),
            published,
        }
    }
}

/// Executes a graph and publishes one of its artifacts.
pub struct PipelineRunner {
    executor: GraphExecutor,
    publisher: Arc<dyn Publisher>,
}

impl PipelineRunner {
    pub fn new(executor: GraphExecutor, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            executor,
            publisher,
        }
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    /// Run a graph, then publish the requested artifact if every task
    /// succeeded. The publish target is validated before anything runs.
    pub async fn run(
        &self,
        graph: Arc<TaskGraph>,
        params: &ParameterSet,
        publish: Option<&PublishRequest>,
    ) -> Result<RunSummary, PipelineError> {
        if let Some(request) = publish {
            request.validate(&graph)?;
        }

        let report = self.executor.execute(graph, params).await?;

        let published = match publish {
            Some(request) => Some(self.publish(&report, request).await?),
            None => None,
        };
        Ok(RunSummary::from_report(&report, published))
    }

    /// Build, run and publish the RNA-seq pipeline.
    pub async fn run_rnaseq(
        &self,
        pipeline: &RnaSeqPipeline,
        params: &RnaSeqParams,
    ) -> Result<RunSummary, PipelineError> {
        let destination = params.destination()?;
        let graph = pipeline.build()?;
        let request = PublishRequest::new(COUNT, "abundance", destination);
        self.run(Arc::new(graph), &params.to_parameter_set(), Some(&request))
            .await
    }

    async fn publish(
        &self,
        report: &RunReport,
        request: &PublishRequest,
    ) -> Result<PathBuf, PipelineError> {
        let artifact = report
            .artifact(&request.task, &request.output)
            .ok_or_else(|| PublishError::UnknownOutput {
                task: request.task.to_string(),
                output: request.output.clone(),
            })?;
        let path = request.destination.path();
        self.publisher.copy(&artifact, &path).await?;

        if let Some(bus) = self.executor.event_bus() {
            bus.emit(Event::artifact_published(
                report.run_id,
                artifact.id.clone(),
                path.clone(),
            ))
            .await;
        }
        Ok(path)
    }
}
