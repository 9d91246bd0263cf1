//! Graph builder from YAML configuration.
//!
//! Converts a `PipelineConfig` into a validated `TaskGraph` through
//! `GraphBuilder`, so YAML pipelines get exactly the checks programmatic ones
//! do.

use std::path::Path;
use std::time::Duration;

use crate::core::graph::{GraphBuilder, TaskGraph};
use crate::core::task::{InputSource, TaskSpec, TaskSpecBuilder};

use super::error::ConfigError;
use super::types::{ActionConfig, PipelineConfig, TaskConfig};
use super::yaml::{YamlLoader, split_artifact};

/// Builder for creating task graphs from YAML configuration.
pub struct PipelineConfigBuilder;

impl PipelineConfigBuilder {
    /// Build a graph from a pipeline configuration.
    pub fn build(config: &PipelineConfig) -> Result<TaskGraph, ConfigError> {
        let mut builder = GraphBuilder::new(config.id.as_str());
        if config.allow_forward_references {
            builder = builder.allow_forward_references();
        }

        for (name, ty) in &config.params {
            builder.add_param(name.as_str(), *ty)?;
        }
        for task_config in &config.tasks {
            let spec = Self::build_task(task_config)?.build()?;
            builder.add_task(spec)?;
        }

        Ok(builder.build()?)
    }

    fn build_task(config: &TaskConfig) -> Result<TaskSpecBuilder, ConfigError> {
        let mut task = match &config.action {
            ActionConfig::Container { image, command } => {
                TaskSpec::container(config.id.as_str(), image.as_str(), command.as_str())
            }
            ActionConfig::Fetch { fetch } => TaskSpec::fetch(config.id.as_str(), fetch.as_str()),
        };

        task = task
            .resources(config.resources.requirements(&config.id)?)
            .environment(config.environment.clone());
        if let Some(description) = &config.description {
            task = task.description(description.as_str());
        }
        if let Some(secs) = config.timeout_secs {
            task = task.timeout(Duration::from_secs(secs));
        }

        for input in &config.inputs {
            let source = match (&input.param, &input.artifact) {
                (Some(param), None) => InputSource::param(param.as_str()),
                (None, Some(artifact)) => {
                    let (producer, output) = split_artifact(artifact).ok_or_else(|| {
                        ConfigError::InvalidConfig(format!(
                            "task '{}' input '{}': artifact '{}' must be written as task.output",
                            config.id, input.slot, artifact
                        ))
                    })?;
                    InputSource::output(producer, output)
                }
                _ => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' input '{}' must set exactly one of param or artifact",
                        config.id, input.slot
                    )));
                }
            };
            task = task.input(input.slot.as_str(), input.ty, source);
        }

        for output in &config.outputs {
            task = task.output(output.name.as_str(), output.kind, output.path.clone());
        }
        Ok(task)
    }
}

/// Load a pipeline file and build its graph.
pub fn load_pipeline_graph(path: impl AsRef<Path>) -> Result<TaskGraph, ConfigError> {
    let config = YamlLoader::load_pipeline(path)?;
    PipelineConfigBuilder::build(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::GraphError;
    use crate::core::resource::MIB;
    use crate::core::types::TaskId;

    fn build(yaml: &str) -> Result<TaskGraph, ConfigError> {
        PipelineConfigBuilder::build(&YamlLoader::parse_pipeline(yaml).unwrap())
    }

    #[test]
    fn test_build_simple_pipeline() {
        let graph = build(
            r#"
id: hello
params:
  name: string
tasks:
  - id: greet
    image: alpine:3
    command: "echo {name} > out.txt"
    resources: { cpus: 2, memory: 512MiB }
    inputs:
      - { slot: name, type: string, param: name }
    outputs:
      - { name: out, kind: file, path: out.txt }
    timeout_secs: 5
"#,
        )
        .unwrap();

        assert_eq!(graph.id().as_str(), "hello");
        let greet = graph.task(&TaskId::new("greet")).unwrap();
        assert_eq!(greet.resources.cpu_count, 2);
        assert_eq!(greet.resources.memory_bytes, 512 * MIB);
        assert_eq!(greet.timeout, Some(Duration::from_secs(5)));
        assert_eq!(greet.action.image(), Some("alpine:3"));
    }

    #[test]
    fn test_build_pipeline_with_dependencies() {
        let graph = build(
            r#"
id: chain
tasks:
  - id: a
    image: x
    command: "echo a > a.txt"
    outputs: [{ name: out, kind: file, path: a.txt }]
  - id: b
    image: x
    command: "cat {in} > b.txt"
    inputs: [{ slot: in, type: file, artifact: a.out }]
    outputs: [{ name: out, kind: file, path: b.txt }]
"#,
        )
        .unwrap();

        assert_eq!(graph.dependencies(&TaskId::new("b")), &[TaskId::new("a")]);
    }

    #[test]
    fn test_forward_reference_requires_opt_in() {
        let yaml = r#"
id: reversed
{mode}
tasks:
  - id: b
    image: x
    command: "cat {in}"
    inputs: [{ slot: in, type: file, artifact: a.out }]
  - id: a
    image: x
    command: "echo a > a.txt"
    outputs: [{ name: out, kind: file, path: a.txt }]
"#;

        let strict = build(&yaml.replace("{mode}", ""));
        assert!(matches!(
            strict,
            Err(ConfigError::Graph(GraphError::UnresolvedReference { .. }))
        ));

        let deferred = build(&yaml.replace("{mode}", "allow_forward_references: true")).unwrap();
        let order: Vec<&str> = deferred
            .topological_order()
            .iter()
            .map(|t| t.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_type_mismatch_surfaces_as_graph_error() {
        let result = build(
            r#"
id: mismatch
tasks:
  - id: a
    image: x
    command: "mkdir d"
    outputs: [{ name: out, kind: dir, path: d }]
  - id: b
    image: x
    command: "cat {in}"
    inputs: [{ slot: in, type: file, artifact: a.out }]
"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::Graph(GraphError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_invalid_resource_size() {
        let result = build(
            r#"
id: bad
tasks:
  - id: a
    image: x
    command: "true"
    resources: { memory: plenty }
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("memory")));
    }

    #[test]
    fn test_demo_rnaseq_matches_builtin_pipeline() {
        let from_yaml = build(include_str!("../../demos/pipelines/rnaseq.yaml")).unwrap();
        let builtin = crate::pipeline::RnaSeqPipeline::new("quay.io/example/rnaseq-tools:1.0")
            .build()
            .unwrap();

        assert_eq!(from_yaml.topological_order(), builtin.topological_order());
        assert_eq!(from_yaml.params(), builtin.params());
        for task in builtin.tasks() {
            let yaml_task = from_yaml.task(&task.id).unwrap();
            assert_eq!(yaml_task.resources, task.resources);
            assert_eq!(
                yaml_task.action.template().source(),
                task.action.template().source()
            );
        }
    }

    #[test]
    fn test_load_pipeline_graph_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("p.yaml");
        std::fs::write(
            &path,
            "id: one\ntasks:\n  - { id: only, image: x, command: \"true\" }\n",
        )
        .unwrap();

        let graph = load_pipeline_graph(&path).unwrap();
        assert_eq!(graph.len(), 1);
    }
}
