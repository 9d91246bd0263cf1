//! Publishing artifacts to external destinations.
//!
//! A [`Destination`] is a directory prefix that must end in a path
//! separator; the published file lands at `prefix + file_name`. The prefix is
//! validated when the destination is constructed, which callers do before
//! running anything, so a bad prefix never costs a pipeline run.

use async_trait::async_trait;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::core::artifact::{Artifact, ArtifactKind};

/// Errors raised while validating a destination or copying an artifact.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The destination prefix does not end in a path separator.
    #[error("destination '{0}' must end with a path separator")]
    NotADirectoryPrefix(String),

    /// The file name is empty or contains a separator.
    #[error("invalid published file name '{0}'")]
    InvalidFileName(String),

    /// The graph has no such task output to publish.
    #[error("no output '{output}' on task '{task}' to publish")]
    UnknownOutput { task: String, output: String },

    /// The source artifact no longer exists.
    #[error("artifact {artifact} is missing at {}", .path.display())]
    MissingSource { artifact: String, path: PathBuf },

    /// Directories cannot be published as a single file.
    #[error("artifact {0} is a directory and cannot be published as a file")]
    NotAFile(String),

    /// The destination could not be written.
    #[error("cannot write {}: {source}", .path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A validated publish target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    prefix: String,
    file_name: String,
}

impl Destination {
    /// Validate a prefix and file name.
    pub fn new(prefix: impl Into<String>, file_name: impl Into<String>) -> Result<Self, PublishError> {
        let prefix = prefix.into();
        let file_name = file_name.into();

        if !prefix.ends_with('/') && !prefix.ends_with(MAIN_SEPARATOR) {
            return Err(PublishError::NotADirectoryPrefix(prefix));
        }
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains(MAIN_SEPARATOR)
            || file_name == "."
            || file_name == ".."
        {
            return Err(PublishError::InvalidFileName(file_name));
        }
        Ok(Self { prefix, file_name })
    }

    /// The directory prefix, separator included.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full destination path: prefix followed by the file name.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.prefix, self.file_name))
    }
}

/// Copies artifacts out of the run.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Copy `artifact` to `destination`, overwriting any existing file.
    async fn copy(&self, artifact: &Artifact, destination: &Path) -> Result<(), PublishError>;
}

/// Publishes to the local filesystem, creating parent directories as needed.
#[derive(Debug, Clone, Default)]
pub struct LocalPublisher;

impl LocalPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn copy(&self, artifact: &Artifact, destination: &Path) -> Result<(), PublishError> {
        let source = artifact.location.path();
        if artifact.kind == ArtifactKind::Dir {
            return Err(PublishError::NotAFile(artifact.id.to_string()));
        }
        if !source.is_file() {
            return Err(PublishError::MissingSource {
                artifact: artifact.id.to_string(),
                path: source.to_path_buf(),
            });
        }

        let unwritable = |source| PublishError::Unwritable {
            path: destination.to_path_buf(),
            source,
        };
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(unwritable)?;
        }
        let bytes = tokio::fs::copy(source, destination)
            .await
            .map_err(unwritable)?;

        debug!(
            artifact = %artifact.id,
            destination = %destination.display(),
            bytes,
            "published artifact"
        );
        Ok(())
    }
}
