//! vessel: a containerized, resource-aware pipeline executor.
//!
//! Pipelines are typed task graphs. Each task runs one shell command inside
//! a container image with declared CPU, memory and disk requirements; edges
//! come from tasks consuming the file and directory artifacts of other tasks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vessel::{
//!     ArtifactKind, DockerRuntime, GraphBuilder, GraphExecutor, HostCapacity, ParamType,
//!     ParameterSet, TaskExecutor, TaskSpec, Workspace,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new("hello")
//!     .param("name", ParamType::String)
//!     .task(
//!         TaskSpec::container("greet", "alpine:3", "echo hello {name} > greeting.txt")
//!             .param("name", "name", ParamType::String)
//!             .output("greeting", ArtifactKind::File, "greeting.txt"),
//!     )
//!     .build()?;
//!
//! let executor = GraphExecutor::new(
//!     TaskExecutor::new(Arc::new(DockerRuntime::new())),
//!     HostCapacity::unbounded(),
//!     Workspace::new("runs"),
//! );
//! let report = executor
//!     .execute(Arc::new(graph), &ParameterSet::new().with("name", "world"))
//!     .await?;
//! println!("{:?}", report.artifact(&"greet".into(), "greeting"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod execution;
pub mod pipeline;
pub mod publish;
pub mod testing;

pub use core::artifact::{Artifact, ArtifactId, ArtifactKind, ArtifactLocation, ArtifactStore};
pub use core::environment::Environment;
pub use core::graph::{GraphBuilder, GraphError, TaskGraph};
pub use core::param::{BoundParameters, ParamError, ParamType, ParamValue, ParameterSet};
pub use core::resource::{HostCapacity, ResourceRequirements, parse_byte_size};
pub use core::task::{InputSource, TaskAction, TaskFailure, TaskSpec, TaskSpecBuilder, ValueType};
pub use core::template::{CommandTemplate, TemplateError};
pub use core::types::{GraphId, RunId, TaskId};
pub use error::PipelineError;
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    ContainerRuntime, DockerRuntime, Fetcher, GraphExecutor, HttpFetcher, LocalRuntime,
    RunReport, TaskExecutor, Workspace,
};
pub use pipeline::{PipelineRunner, RnaSeqParams, RnaSeqPipeline, RunSummary};
pub use publish::{Destination, LocalPublisher, PublishError, Publisher};
