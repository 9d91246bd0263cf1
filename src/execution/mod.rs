//! Task execution engine.
//!
//! This module turns a validated task graph into running containers:
//! runtimes and the fetch capability at the bottom, resource and workspace
//! management in the middle, and the task and graph executors on top.

mod docker;
mod executor;
mod fetch;
mod graph_executor;
mod local;
mod pool;
mod runtime;
mod workspace;

pub use docker::{DockerRuntime, container_name};
pub use executor::{TaskContext, TaskExecutor, TaskResult};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use graph_executor::{GraphExecutor, RunReport};
pub use local::LocalRuntime;
pub use pool::{PoolError, Reservation, ResourcePool};
pub use runtime::{
    CapturedOutput, ContainerInvocation, ContainerRuntime, RuntimeError, RuntimeOutcome,
    capture_outputs,
};
pub use workspace::{RunWorkspace, Workspace};
