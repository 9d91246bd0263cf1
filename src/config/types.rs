//! Configuration type definitions.
//!
//! `Settings` is the executor configuration (`vessel.yaml`); `PipelineConfig`
//! is a declarative description of a task graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::artifact::ArtifactKind;
use crate::core::environment::Environment;
use crate::core::param::ParamType;
use crate::core::resource::{
    HostCapacity, ResourceRequirements, available_cpus, available_disk, parse_byte_size,
    physical_memory,
};
use crate::core::task::ValueType;
use crate::execution::{
    ContainerRuntime, DockerRuntime, GraphExecutor, LocalRuntime, TaskExecutor, Workspace,
};

use super::error::ConfigError;

/// Executor settings (vessel.yaml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Image every RNA-seq tool stage runs in.
    pub tool_image: Option<String>,
    /// Directory holding run workspaces.
    pub workspace: PathBuf,
    /// Container runtime.
    pub runtime: RuntimeConfig,
    /// Host resources shared by concurrently running tasks.
    pub capacity: CapacityConfig,
    /// Timeout applied to tasks that do not set their own.
    pub task_timeout_secs: Option<u64>,
    /// Variables set in every task.
    pub environment: Environment,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tool_image: None,
            workspace: PathBuf::from("vessel-runs"),
            runtime: RuntimeConfig::default(),
            capacity: CapacityConfig::default(),
            task_timeout_secs: None,
            environment: Environment::new(),
        }
    }
}

impl Settings {
    /// The configured tool image, required by the RNA-seq pipeline.
    pub fn tool_image(&self) -> Result<&str, ConfigError> {
        self.tool_image
            .as_deref()
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("tool_image".into()))
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Host capacity.
    ///
    /// Unset dimensions are detected from the host: logical CPUs, physical
    /// memory, and free space under the workspace. With `capacity.unbounded`
    /// they are left unbounded instead.
    pub fn host_capacity(&self) -> Result<HostCapacity, ConfigError> {
        let capacity = &self.capacity;
        let unbounded = HostCapacity::unbounded();

        let cpus = match capacity.cpus {
            Some(0) => {
                return Err(ConfigError::InvalidConfig(
                    "capacity.cpus must be at least 1".into(),
                ));
            }
            Some(cpus) => cpus,
            None if capacity.unbounded => unbounded.cpu_count,
            None => available_cpus(),
        };
        let memory = match &capacity.memory {
            Some(size) => size.bytes("capacity.memory")?,
            None if capacity.unbounded => unbounded.memory_bytes,
            None => physical_memory()
                .ok_or_else(|| ConfigError::MissingField("capacity.memory".into()))?,
        };
        let disk = match &capacity.disk {
            Some(size) => size.bytes("capacity.disk")?,
            None if capacity.unbounded => unbounded.disk_bytes,
            None => available_disk(&self.workspace)
                .ok_or_else(|| ConfigError::MissingField("capacity.disk".into()))?,
        };
        Ok(HostCapacity::new(cpus, memory, disk))
    }

    pub fn container_runtime(&self) -> Arc<dyn ContainerRuntime> {
        match &self.runtime {
            RuntimeConfig::Docker { binary } => Arc::new(DockerRuntime::with_binary(binary)),
            RuntimeConfig::Local => Arc::new(LocalRuntime::new()),
        }
    }

    /// Build a graph executor wired to these settings.
    pub fn graph_executor(&self) -> Result<GraphExecutor, ConfigError> {
        let mut task_executor = TaskExecutor::new(self.container_runtime())
            .with_environment(self.environment.clone());
        if let Some(timeout) = self.task_timeout() {
            task_executor = task_executor.with_default_timeout(timeout);
        }
        Ok(GraphExecutor::new(
            task_executor,
            self.host_capacity()?,
            Workspace::new(&self.workspace),
        ))
    }
}

/// Container runtime selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeConfig {
    /// A docker-compatible CLI (docker, podman).
    Docker {
        #[serde(default = "default_docker_binary")]
        binary: String,
    },
    /// Run commands on the host shell, ignoring images.
    Local,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig::Docker {
            binary: default_docker_binary(),
        }
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

/// Host capacity limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Leave unset dimensions unbounded rather than detecting them.
    pub unbounded: bool,
    pub cpus: Option<u32>,
    pub memory: Option<ByteSize>,
    pub disk: Option<ByteSize>,
}

/// A byte count written either as an integer or a human size ("16GiB").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteSize {
    Bytes(u64),
    Human(String),
}

impl ByteSize {
    /// Resolve to bytes; `field` names the setting in errors.
    pub fn bytes(&self, field: &str) -> Result<u64, ConfigError> {
        match self {
            ByteSize::Bytes(n) => Ok(*n),
            ByteSize::Human(s) => parse_byte_size(s).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("{}: invalid byte size '{}'", field, s))
            }),
        }
    }
}

/// A task graph described in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Graph identifier.
    pub id: String,
    /// Optional description.
    pub description: Option<String>,
    /// Accept tasks that reference tasks defined after them.
    #[serde(default)]
    pub allow_forward_references: bool,
    /// Declared parameters and their types.
    #[serde(default)]
    pub params: BTreeMap<String, ParamType>,
    /// Task definitions.
    pub tasks: Vec<TaskConfig>,
}

/// One task of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the pipeline).
    pub id: String,
    pub description: Option<String>,
    /// What the task does.
    #[serde(flatten)]
    pub action: ActionConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    /// Template slot bindings, in order.
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    /// Declared outputs, in order.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub environment: Environment,
    pub timeout_secs: Option<u64>,
}

/// Task action: a container command or a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionConfig {
    Container { image: String, command: String },
    Fetch { fetch: String },
}

/// Resource request of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub cpus: u32,
    pub memory: Option<ByteSize>,
    pub disk: Option<ByteSize>,
}

impl ResourcesConfig {
    pub fn requirements(&self, task: &str) -> Result<ResourceRequirements, ConfigError> {
        let bytes = |size: &Option<ByteSize>, field: &str| match size {
            Some(size) => size.bytes(&format!("tasks.{}.resources.{}", task, field)),
            None => Ok(0),
        };
        Ok(ResourceRequirements::none()
            .with_cpu(self.cpus)
            .with_memory(bytes(&self.memory, "memory")?)
            .with_disk(bytes(&self.disk, "disk")?))
    }
}

/// Binds a template slot to a parameter or an upstream output.
///
/// Exactly one of `param` and `artifact` must be set. `artifact` is written
/// as `task.output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    pub slot: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
    pub param: Option<String>,
    pub artifact: Option<String>,
}

/// A declared output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub name: String,
    pub kind: ArtifactKind,
    /// Path relative to the task's working directory.
    pub path: PathBuf,
}
