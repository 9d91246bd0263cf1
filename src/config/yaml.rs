//! YAML configuration parsing.
//!
//! Parses executor settings and pipeline definitions from YAML files.
//! Structural checks that need no graph (non-empty ids, well-formed input
//! bindings) happen here; graph validation happens when the pipeline is built.

use std::path::Path;

use super::error::ConfigError;
use super::types::{InputConfig, PipelineConfig, Settings};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load settings from a file.
    pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings from `path`, or defaults when no path is given.
    pub fn load_settings_or_default(path: Option<&Path>) -> Result<Settings, ConfigError> {
        match path {
            Some(path) => Self::load_settings(path),
            None => Ok(Settings::default()),
        }
    }

    /// Parse settings from a YAML string. An empty document yields defaults.
    pub fn parse_settings(yaml: &str) -> Result<Settings, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a pipeline definition from a file.
    pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: PipelineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_pipeline(&config)?;
        Ok(config)
    }

    /// Parse a pipeline definition from a YAML string.
    pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        Self::validate_pipeline(&config)?;
        Ok(config)
    }

    fn validate_pipeline(config: &PipelineConfig) -> Result<(), ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "pipeline must have at least one task".into(),
            ));
        }

        for task in &config.tasks {
            if task.id.trim().is_empty() {
                return Err(ConfigError::MissingField("tasks[].id".into()));
            }
            for input in &task.inputs {
                Self::validate_input(&task.id, input)?;
            }
        }
        Ok(())
    }

    fn validate_input(task: &str, input: &InputConfig) -> Result<(), ConfigError> {
        match (&input.param, &input.artifact) {
            (Some(_), None) => Ok(()),
            (None, Some(artifact)) => split_artifact(artifact).map(|_| ()).ok_or_else(|| {
                ConfigError::InvalidConfig(format!(
                    "task '{}' input '{}': artifact '{}' must be written as task.output",
                    task, input.slot, artifact
                ))
            }),
            _ => Err(ConfigError::InvalidConfig(format!(
                "task '{}' input '{}' must set exactly one of param or artifact",
                task, input.slot
            ))),
        }
    }
}

/// Split `task.output` at its last dot.
pub(crate) fn split_artifact(reference: &str) -> Option<(&str, &str)> {
    reference
        .rsplit_once('.')
        .filter(|(task, output)| !task.is_empty() && !output.is_empty())
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}
