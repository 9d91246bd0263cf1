//! Run-level errors.

use thiserror::Error;

use crate::core::graph::GraphError;
use crate::core::param::ParamError;
use crate::core::resource::{HostCapacity, ResourceRequirements};
use crate::core::task::TaskFailure;
use crate::core::types::TaskId;
use crate::publish::PublishError;

/// Everything that can abort a pipeline run.
///
/// Construction and binding errors surface before any task runs. Task and
/// publish errors surface at run time; either way nothing is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The graph is invalid.
    #[error("invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// The parameter set does not match the graph's declared parameters.
    #[error("invalid parameters: {0}")]
    Binding(#[from] ParamError),

    /// A task asks for more than the host can ever provide.
    #[error("task '{task_id}' requests {requested}, exceeding capacity of {capacity}")]
    InsufficientResources {
        task_id: TaskId,
        requested: ResourceRequirements,
        capacity: HostCapacity,
    },

    /// A task failed. `exit_status` is set when its command ran and exited
    /// non-zero.
    #[error("task '{task_id}' failed: {cause}")]
    TaskExecutionFailed {
        task_id: TaskId,
        exit_status: Option<i32>,
        #[source]
        cause: TaskFailure,
    },

    /// Publishing the final artifact failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The run workspace could not be created.
    #[error("workspace error: {0}")]
    Workspace(#[source] std::io::Error),
}

impl PipelineError {
    pub(crate) fn task_failed(task_id: TaskId, cause: TaskFailure) -> Self {
        PipelineError::TaskExecutionFailed {
            task_id,
            exit_status: cause.exit_status(),
            cause,
        }
    }

    /// The failing task, for task-level errors.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            PipelineError::TaskExecutionFailed { task_id, .. }
            | PipelineError::InsufficientResources { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
