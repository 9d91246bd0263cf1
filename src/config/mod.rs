//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for executor settings and
//! pipeline definitions.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{PipelineConfigBuilder, load_pipeline_graph};
pub use error::ConfigError;
pub use types::{
    ActionConfig, ByteSize, CapacityConfig, InputConfig, OutputConfig, PipelineConfig,
    ResourcesConfig, RuntimeConfig, Settings, TaskConfig,
};
pub use yaml::YamlLoader;
