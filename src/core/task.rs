//! Task specifications and failure types.
//!
//! A [`TaskSpec`] is pure data: what to run (a container command or a fetch),
//! which typed inputs feed its template slots, which outputs it promises, and
//! how much CPU, memory and disk it needs. The executor turns a spec into a
//! running container; nothing here performs I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::artifact::ArtifactKind;
use super::environment::Environment;
use super::graph::GraphError;
use super::param::ParamType;
use super::resource::ResourceRequirements;
use super::template::{CommandTemplate, TemplateError};
use super::types::TaskId;

/// Reasons a single task can fail at run time.
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The command exited with a non-zero status.
    #[error("command exited with status {code}")]
    NonZeroExit { code: i32, stderr: String },

    /// A declared output was absent (or of the wrong kind) after completion.
    #[error("declared {kind} output '{name}' not found at {}", .path.display())]
    MissingOutput {
        name: String,
        kind: ArtifactKind,
        path: PathBuf,
    },

    /// The task exceeded its timeout.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// An input had no value when the task was launched.
    #[error("input '{0}' has no value")]
    MissingInput(String),

    /// The container runtime could not run the command.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// The fetch capability failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The task's workspace could not be prepared.
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    /// Rendering the command failed.
    #[error("command template error: {0}")]
    Template(#[from] TemplateError),
}

impl TaskFailure {
    /// Exit status of the command, when the command actually ran.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            TaskFailure::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Type expected by a task input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    File,
    Dir,
}

impl From<ParamType> for ValueType {
    fn from(ty: ParamType) -> Self {
        match ty {
            ParamType::String => ValueType::String,
            ParamType::Number => ValueType::Number,
        }
    }
}

impl From<ArtifactKind> for ValueType {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::File => ValueType::File,
            ArtifactKind::Dir => ValueType::Dir,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::File => "file",
            ValueType::Dir => "dir",
        };
        write!(f, "{}", s)
    }
}

/// Where an input's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// A run parameter.
    Param(String),
    /// A named output of another task.
    Output { task: TaskId, output: String },
}

impl InputSource {
    pub fn param(name: impl Into<String>) -> Self {
        InputSource::Param(name.into())
    }

    pub fn output(task: impl Into<TaskId>, output: impl Into<String>) -> Self {
        InputSource::Output {
            task: task.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Param(name) => write!(f, "param '{}'", name),
            InputSource::Output { task, output } => write!(f, "output '{}.{}'", task, output),
        }
    }
}

/// A typed input bound to a template slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub slot: String,
    pub ty: ValueType,
    pub source: InputSource,
}

/// A declared output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub name: String,
    pub kind: ArtifactKind,
    /// Path relative to the task's working directory.
    pub path: PathBuf,
}

/// What the task does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Run a shell command inside a container image.
    Container {
        image: String,
        command: CommandTemplate,
    },
    /// Retrieve a remote resource into the task's single file output.
    Fetch { url: CommandTemplate },
}

impl TaskAction {
    /// The template whose slots must be bound by inputs.
    pub fn template(&self) -> &CommandTemplate {
        match self {
            TaskAction::Container { command, .. } => command,
            TaskAction::Fetch { url } => url,
        }
    }

    /// Container image, for container actions.
    pub fn image(&self) -> Option<&str> {
        match self {
            TaskAction::Container { image, .. } => Some(image),
            TaskAction::Fetch { .. } => None,
        }
    }
}

/// A fully specified task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: TaskId,
    pub action: TaskAction,
    pub resources: ResourceRequirements,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
    pub environment: Environment,
    pub timeout: Option<Duration>,
    pub description: Option<String>,
}

impl TaskSpec {
    /// Start building a container task.
    pub fn container(
        id: impl Into<TaskId>,
        image: impl Into<String>,
        command: impl Into<String>,
    ) -> TaskSpecBuilder {
        TaskSpecBuilder::new(id.into(), ActionDraft::Container {
            image: image.into(),
            command: command.into(),
        })
    }

    /// Start building a fetch task. The URL may contain slots.
    pub fn fetch(id: impl Into<TaskId>, url: impl Into<String>) -> TaskSpecBuilder {
        TaskSpecBuilder::new(id.into(), ActionDraft::Fetch { url: url.into() })
    }

    /// Position of an output by name.
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name == name)
    }

    /// Look up an input by slot name.
    pub fn input(&self, slot: &str) -> Option<&TaskInput> {
        self.inputs.iter().find(|i| i.slot == slot)
    }
}

#[derive(Debug, Clone)]
enum ActionDraft {
    Container { image: String, command: String },
    Fetch { url: String },
}

/// Builder for [`TaskSpec`]. Structural checks run in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct TaskSpecBuilder {
    id: TaskId,
    action: ActionDraft,
    resources: ResourceRequirements,
    inputs: Vec<TaskInput>,
    outputs: Vec<TaskOutput>,
    environment: Environment,
    timeout: Option<Duration>,
    description: Option<String>,
}

impl TaskSpecBuilder {
    fn new(id: TaskId, action: ActionDraft) -> Self {
        Self {
            id,
            action,
            resources: ResourceRequirements::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            environment: Environment::default(),
            timeout: None,
            description: None,
        }
    }

    /// Set the full resource request.
    pub fn resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    pub fn cpu(mut self, cores: u32) -> Self {
        self.resources.cpu_count = cores;
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.resources.memory_bytes = bytes;
        self
    }

    pub fn disk(mut self, bytes: u64) -> Self {
        self.resources.disk_bytes = bytes;
        self
    }

    /// Bind a slot to an arbitrary typed source.
    pub fn input(mut self, slot: impl Into<String>, ty: ValueType, source: InputSource) -> Self {
        self.inputs.push(TaskInput {
            slot: slot.into(),
            ty,
            source,
        });
        self
    }

    /// Bind a slot to a run parameter.
    pub fn param(self, slot: impl Into<String>, name: impl Into<String>, ty: ParamType) -> Self {
        self.input(slot, ty.into(), InputSource::param(name))
    }

    /// Bind a slot to an upstream task's output.
    pub fn artifact(
        self,
        slot: impl Into<String>,
        task: impl Into<TaskId>,
        output: impl Into<String>,
        kind: ArtifactKind,
    ) -> Self {
        self.input(slot, kind.into(), InputSource::output(task, output))
    }

    /// Declare an output produced at `path` relative to the working directory.
    pub fn output(
        mut self,
        name: impl Into<String>,
        kind: ArtifactKind,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.outputs.push(TaskOutput {
            name: name.into(),
            kind,
            path: path.into(),
        });
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Parse the template and check the task's internal consistency.
    ///
    /// References to parameters and other tasks are resolved later by the
    /// graph builder.
    pub fn build(self) -> Result<TaskSpec, GraphError> {
        let id = self.id;
        let invalid = |reason: String| GraphError::InvalidTask {
            task: id.clone(),
            reason,
        };
        let template_error = |source: TemplateError| GraphError::InvalidTemplate {
            task: id.clone(),
            source,
        };

        if !is_valid_task_id(id.as_str()) {
            return Err(invalid(
                "task ids use only letters, digits, '_', '-' and '.'".into(),
            ));
        }

        let action = match self.action {
            ActionDraft::Container { image, command } => {
                if image.trim().is_empty() {
                    return Err(invalid("container image is empty".into()));
                }
                TaskAction::Container {
                    image,
                    command: CommandTemplate::parse(command).map_err(template_error)?,
                }
            }
            ActionDraft::Fetch { url } => TaskAction::Fetch {
                url: CommandTemplate::parse(url).map_err(template_error)?,
            },
        };

        // A container task without outputs is a valid sink.
        if let TaskAction::Fetch { .. } = action
            && (self.outputs.len() != 1 || self.outputs[0].kind != ArtifactKind::File)
        {
            return Err(invalid("fetch tasks declare exactly one file output".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(invalid(format!("duplicate output '{}'", output.name)));
            }
            if !is_contained(&output.path) {
                return Err(invalid(format!(
                    "output '{}' path {} must be relative and stay inside the task directory",
                    output.name,
                    output.path.display()
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for input in &self.inputs {
            if !seen.insert(input.slot.as_str()) {
                return Err(invalid(format!("duplicate input slot '{}'", input.slot)));
            }
        }

        Ok(TaskSpec {
            id,
            action,
            resources: self.resources,
            inputs: self.inputs,
            outputs: self.outputs,
            environment: self.environment,
            timeout: self.timeout,
            description: self.description,
        })
    }
}

/// Task ids double as directory names in the run workspace.
fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
