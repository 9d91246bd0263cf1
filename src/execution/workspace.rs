//! On-disk layout of runs.
//!
//! ```text
//! <root>/
//!   <run id>/
//!     <task id>/      working directory of one task; its outputs live here
//! ```
//!
//! Nothing is cleaned up: intermediates stay on disk after the run, including
//! after a failure.

use std::io;
use std::path::{Path, PathBuf};

use crate::core::types::{RunId, TaskId};

/// Root under which run directories are created.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for a run. The returned path is absolute so it
    /// can be bind-mounted into containers.
    pub async fn create_run(&self, run_id: RunId) -> io::Result<RunWorkspace> {
        let dir = self.root.join(run_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let dir = tokio::fs::canonicalize(&dir).await?;
        Ok(RunWorkspace { dir })
    }
}

/// Directory of a single run.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    dir: PathBuf,
}

impl RunWorkspace {
    /// Absolute path of the run directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create and return a task's working directory.
    pub async fn task_dir(&self, task: &TaskId) -> io::Result<PathBuf> {
        let dir = self.dir.join(task.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}
