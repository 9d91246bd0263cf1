//! Host shell runtime.
//!
//! Runs the rendered command with `sh -c` directly on the host, in the task's
//! working directory. The image is ignored, so the tools must already be on
//! `PATH`. Resource requests are still reserved by the executor but are not
//! enforced as limits.
//!
//! The shell leads its own process group, so a timeout or cancellation kills
//! every process the command started, not just the shell.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::runtime::{
    ContainerInvocation, ContainerRuntime, RuntimeError, RuntimeOutcome, Teardown, run_process,
};

/// Runs tasks in a host shell.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    shell: String,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<RuntimeOutcome, RuntimeError> {
        debug!(
            task = %invocation.task_id,
            image = %invocation.image,
            "running on host, image ignored"
        );

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&invocation.command);
        cmd.current_dir(&invocation.work_dir);
        for (key, value) in invocation.environment.iter() {
            cmd.env(key, value);
        }
        run_process(cmd, &self.shell, invocation, Teardown::ProcessGroup).await
    }
}
