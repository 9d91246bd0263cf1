//! vessel - run containerized, resource-aware pipelines.
//!
//! Usage:
//!   vessel rnaseq --sra-acc A --reference-genome-url U --output-prefix P
//!   vessel run <pipeline.yaml> --param k=v ...
//!   vessel validate <pipeline.yaml>

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use vessel::config::{Settings, YamlLoader, load_pipeline_graph};
use vessel::events::{Event, EventBus, EventHandler};
use vessel::pipeline::{PipelineRunner, PublishRequest, RnaSeqParams, RnaSeqPipeline, RunSummary};
use vessel::{Destination, LocalPublisher, ParameterSet, PipelineError, TaskGraph};

/// vessel - run containerized, resource-aware pipelines
#[derive(Parser)]
#[command(name = "vessel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (vessel.yaml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align RNA-seq reads and publish per-sequence abundance
    Rnaseq {
        /// SRA accession of the reads
        #[arg(long)]
        sra_acc: String,

        /// URL of the (optionally gzipped) reference genome FASTA
        #[arg(long)]
        reference_genome_url: String,

        /// Directory prefix for abundance.txt; must end with '/'
        #[arg(long)]
        output_prefix: String,

        /// Tool image, overriding the settings file
        #[arg(long)]
        tool_image: Option<String>,
    },

    /// Run a pipeline described in YAML
    Run {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,

        /// Parameter assignment, name=value (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Output to publish, written as task.output
        #[arg(long, requires = "output_prefix")]
        publish: Option<String>,

        /// Directory prefix for the published file; must end with '/'
        #[arg(long, requires = "publish")]
        output_prefix: Option<String>,

        /// Published file name (default: the output's file name)
        #[arg(long, requires = "publish")]
        file_name: Option<String>,
    },

    /// Validate a pipeline without running it
    Validate {
        /// Path to the pipeline YAML file
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,
    },
}

/// Logs lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::RunStarted {
                graph_id,
                run_id,
                task_count,
                ..
            } => {
                info!("Pipeline '{}' started: {} task(s) (run: {})", graph_id, task_count, run_id);
            }
            Event::TaskStarted { task_id, .. } => {
                info!("  Task '{}' started", task_id);
            }
            Event::TaskCompleted {
                task_id,
                duration,
                artifact_count,
                ..
            } => {
                info!(
                    "  Task '{}' completed in {:?} ({} artifact(s))",
                    task_id, duration, artifact_count
                );
            }
            Event::TaskFailed {
                task_id,
                error,
                exit_code,
                stderr,
                ..
            } => {
                let exit_info = exit_code
                    .map(|c| format!(" (exit: {})", c))
                    .unwrap_or_default();
                warn!("  Task '{}' failed{}: {}", task_id, exit_info, error);
                if let Some(err) = stderr {
                    for line in err.trim().lines() {
                        error!("    stderr: {}", line);
                    }
                }
            }
            Event::TaskSkipped { task_id, .. } => {
                warn!("  Task '{}' skipped", task_id);
            }
            Event::RunCompleted {
                graph_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Pipeline '{}' completed in {:?}", graph_id, duration);
                } else {
                    error!("Pipeline '{}' failed after {:?}", graph_id, duration);
                }
            }
            Event::ArtifactPublished {
                artifact,
                destination,
                ..
            } => {
                info!("Published {} to {}", artifact, destination.display());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so --json output stays parseable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rnaseq {
            sra_acc,
            reference_genome_url,
            output_prefix,
            tool_image,
        } => {
            let params = RnaSeqParams {
                sra_acc,
                reference_genome_url,
                output_prefix,
            };
            run_rnaseq(cli.config.as_deref(), tool_image, params, cli.json).await?;
        }
        Commands::Run {
            pipeline,
            params,
            publish,
            output_prefix,
            file_name,
        } => {
            let publish = match (publish, output_prefix) {
                (Some(target), Some(prefix)) => Some((target, prefix, file_name)),
                _ => None,
            };
            run_pipeline(cli.config.as_deref(), &pipeline, &params, publish, cli.json).await?;
        }
        Commands::Validate { pipeline } => {
            validate_pipeline(&pipeline)?;
        }
    }

    Ok(())
}

/// Build a runner from the settings file, logging events.
async fn runner(settings: &Settings) -> Result<PipelineRunner, Box<dyn std::error::Error>> {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let executor = settings.graph_executor()?.with_event_bus(event_bus);
    info!(
        "Runtime: {}, capacity: {}, workspace: {}",
        executor.runtime_name(),
        executor.pool().capacity(),
        executor.workspace_root().display()
    );
    Ok(PipelineRunner::new(executor, Arc::new(LocalPublisher::new())))
}

/// Run the RNA-seq pipeline.
async fn run_rnaseq(
    config: Option<&Path>,
    tool_image: Option<String>,
    params: RnaSeqParams,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = YamlLoader::load_settings_or_default(config)?;
    if tool_image.is_some() {
        settings.tool_image = tool_image;
    }

    // Reject a bad prefix before building or running anything.
    params.destination()?;

    // Stages ask for up to 8 threads; fit them to the host.
    let cpus = settings.host_capacity()?.cpu_count;
    let pipeline = RnaSeqPipeline::new(settings.tool_image()?).cap_cpus(cpus);
    let runner = runner(&settings).await?;
    let summary = until_interrupted(runner.run_rnaseq(&pipeline, &params)).await?;
    report(&summary, json)
}

/// Run a YAML pipeline.
async fn run_pipeline(
    config: Option<&Path>,
    path: &Path,
    assignments: &[String],
    publish: Option<(String, String, Option<String>)>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = YamlLoader::load_settings_or_default(config)?;
    let graph = load_pipeline_graph(path)?;
    let params = ParameterSet::from_assignments(graph.params(), assignments)?;

    let request = match publish {
        Some((target, prefix, file_name)) => Some(publish_request(&graph, &target, prefix, file_name)?),
        None => None,
    };

    let runner = runner(&settings).await?;
    let summary = until_interrupted(runner.run(Arc::new(graph), &params, request.as_ref())).await?;
    report(&summary, json)
}

fn publish_request(
    graph: &TaskGraph,
    target: &str,
    prefix: String,
    file_name: Option<String>,
) -> Result<PublishRequest, Box<dyn std::error::Error>> {
    let (task, output) = target
        .rsplit_once('.')
        .ok_or_else(|| format!("--publish '{}' must be written as task.output", target))?;

    let file_name = match file_name {
        Some(name) => name,
        None => graph
            .task(&task.into())
            .and_then(|spec| spec.outputs.iter().find(|o| o.name == output))
            .and_then(|o| o.path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| format!("no output '{}' on task '{}'", output, task))?,
    };

    Ok(PublishRequest::new(task, output, Destination::new(prefix, file_name)?))
}

/// Await a run, abandoning it on Ctrl+C. Dropping the run kills every
/// process its tasks started and their containers.
async fn until_interrupted<F>(run: F) -> Result<RunSummary, Box<dyn std::error::Error>>
where
    F: Future<Output = Result<RunSummary, PipelineError>>,
{
    tokio::select! {
        result = run => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; abandoning run");
            Err("interrupted".into())
        }
    }
}

fn report(summary: &RunSummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Run {} of '{}' succeeded", summary.run_id, summary.graph_id);
    println!("  Workspace: {}", summary.workspace.display());
    for task in &summary.tasks {
        println!("  - {} ({} ms)", task.task_id, task.duration_ms);
    }
    if let Some(path) = &summary.published {
        println!("  Published: {}", path.display());
    }
    Ok(())
}

/// Validate a pipeline without running.
fn validate_pipeline(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating pipeline: {}", path.display());

    let graph = match load_pipeline_graph(path) {
        Ok(graph) => graph,
        Err(e) => {
            error!("Validation failed: {}", e);
            return Err(e.into());
        }
    };

    println!("Pipeline '{}' is valid: {} task(s)", graph.id(), graph.len());
    if !graph.params().is_empty() {
        let params: Vec<String> = graph
            .params()
            .iter()
            .map(|(name, ty)| format!("{}: {}", name, ty))
            .collect();
        println!("  Parameters: {}", params.join(", "));
    }
    for task_id in graph.topological_order() {
        let deps = graph.dependencies(task_id);
        if deps.is_empty() {
            println!("    - {}", task_id);
        } else {
            let dep_names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
            println!("    - {} (depends on: {})", task_id, dep_names.join(", "));
        }
    }
    Ok(())
}
