//! Artifacts produced by tasks.
//!
//! An artifact is an immutable handle to a file or directory written by
//! exactly one task. Artifacts are recorded in an [`ArtifactStore`] owned by
//! a run once their producer completes, and are read-only from then on:
//!
//! - [`ArtifactKind`]: whether the artifact is a single file or a directory
//! - [`ArtifactLocation`]: where the executor placed it (opaque to callers)
//! - [`ArtifactStore`]: artifacts of a run keyed by `(task, output index)`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use super::types::TaskId;

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// An artifact was recorded twice for the same output.
    #[error("artifact already recorded: {0}")]
    AlreadyRecorded(ArtifactId),

    /// Store lock was poisoned.
    #[error("artifact store lock poisoned")]
    LockPoisoned,
}

/// Kind of artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Dir,
}

impl ArtifactKind {
    /// Check whether an existing path has this kind.
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            ArtifactKind::File => path.is_file(),
            ArtifactKind::Dir => path.is_dir(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::File => write!(f, "file"),
            ArtifactKind::Dir => write!(f, "dir"),
        }
    }
}

/// Identity of an artifact: the producing task and the output's position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub task: TaskId,
    pub index: usize,
}

impl ArtifactId {
    pub fn new(task: TaskId, index: usize) -> Self {
        Self { task, index }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.task, self.index)
    }
}

/// Location of an artifact in the run workspace.
///
/// Only the executor creates locations; callers can read the path but
/// cannot fabricate one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLocation(PathBuf);

impl ArtifactLocation {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Filesystem path of the artifact.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A produced artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    /// Producer and output position.
    pub id: ArtifactId,
    /// Output name as declared by the producer.
    pub name: String,
    /// File or directory.
    pub kind: ArtifactKind,
    /// Where the artifact lives.
    pub location: ArtifactLocation,
}

impl Artifact {
    /// The task that produced this artifact.
    pub fn producer(&self) -> &TaskId {
        &self.id.task
    }
}

/// Artifacts produced during a run.
///
/// `ArtifactStore` is `Clone` and shared between the scheduler and
/// spawned tasks. Each output is recorded once; recording it again is an
/// error.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    inner: Arc<RwLock<BTreeMap<ArtifactId, Artifact>>>,
}

impl ArtifactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly produced artifact.
    pub fn record(&self, artifact: Artifact) -> Result<(), ArtifactError> {
        let mut store = self.inner.write().map_err(|_| ArtifactError::LockPoisoned)?;
        if store.contains_key(&artifact.id) {
            return Err(ArtifactError::AlreadyRecorded(artifact.id));
        }
        store.insert(artifact.id.clone(), artifact);
        Ok(())
    }

    /// Get an artifact by producer and output index.
    pub fn get(&self, task: &TaskId, index: usize) -> Option<Artifact> {
        let store = self.inner.read().ok()?;
        store.get(&ArtifactId::new(task.clone(), index)).cloned()
    }

    /// Get all artifacts produced by a task, in output order.
    pub fn produced_by(&self, task: &TaskId) -> Vec<Artifact> {
        self.inner
            .read()
            .map(|s| {
                s.values()
                    .filter(|a| a.producer() == task)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of recorded artifacts.
    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out all artifacts.
    pub fn snapshot(&self) -> BTreeMap<ArtifactId, Artifact> {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}
