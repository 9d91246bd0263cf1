//! Pipeline model: parameters, artifacts, tasks and graphs.
//!
//! Everything in this module is pure data plus validation. Execution lives
//! in [`crate::execution`].

pub mod artifact;
pub mod environment;
pub mod graph;
pub mod param;
pub mod resource;
pub mod task;
pub mod template;
pub mod types;
