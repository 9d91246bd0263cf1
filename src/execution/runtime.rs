//! Container runtime abstraction.
//!
//! A [`ContainerRuntime`] runs one rendered shell command inside an image
//! with resource limits, then reports the exit status and which declared
//! outputs exist in the task's working directory. Implementations:
//!
//! - [`DockerRuntime`](super::DockerRuntime): shells out to `docker`/`podman`
//! - [`LocalRuntime`](super::LocalRuntime): runs on the host, ignoring the image
//! - [`MockRuntime`](crate::testing::MockRuntime): test double

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::artifact::ArtifactKind;
use crate::core::environment::Environment;
use crate::core::resource::ResourceRequirements;
use crate::core::task::TaskOutput;
use crate::core::types::{RunId, TaskId};

/// Errors raised when the runtime cannot run a command at all.
///
/// A command that runs and exits non-zero is not a `RuntimeError`; it is
/// reported through [`RuntimeOutcome::exit_code`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime binary could not be spawned.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command outlived its time limit and was stopped.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Any other runtime-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Everything a runtime needs to run one task.
#[derive(Debug, Clone)]
pub struct ContainerInvocation {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub image: String,
    /// Fully rendered shell command.
    pub command: String,
    pub resources: ResourceRequirements,
    /// Absolute working directory of the task. Outputs are captured here.
    pub work_dir: PathBuf,
    /// Host directories made visible at the same path inside the container.
    pub mounts: Vec<PathBuf>,
    pub environment: Environment,
    /// Outputs the task declares, relative to `work_dir`.
    pub outputs: Vec<TaskOutput>,
    /// Stop the command once it has run this long.
    pub timeout: Option<Duration>,
}

/// A declared output after the command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub name: String,
    pub kind: ArtifactKind,
    /// Absolute path the output was expected at.
    pub path: PathBuf,
    /// Whether something of the declared kind exists there.
    pub present: bool,
}

/// Result of running a command to completion.
#[derive(Debug, Clone)]
pub struct RuntimeOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Declared outputs in declaration order.
    pub outputs: Vec<CapturedOutput>,
}

impl RuntimeOutcome {
    /// Check if the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs task commands inside container images.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run the invocation to completion.
    ///
    /// When `invocation.timeout` elapses, everything the command started is
    /// stopped before [`RuntimeError::Timeout`] is returned. Dropping the
    /// returned future must also stop it.
    async fn run(&self, invocation: &ContainerInvocation) -> Result<RuntimeOutcome, RuntimeError>;
}

/// Check which declared outputs exist with the declared kind.
pub fn capture_outputs(work_dir: &Path, outputs: &[TaskOutput]) -> Vec<CapturedOutput> {
    outputs
        .iter()
        .map(|output| {
            let path = work_dir.join(&output.path);
            CapturedOutput {
                name: output.name.clone(),
                kind: output.kind,
                present: output.kind.matches(&path),
                path,
            }
        })
        .collect()
}

/// How to stop a spawned command and everything it started.
#[derive(Debug, Clone)]
pub(crate) enum Teardown {
    /// Kill the command's process group.
    ProcessGroup,
    /// Run `program args..` first, then kill the process group.
    Command { program: String, args: Vec<String> },
}

/// Kills the process group of a spawned command when dropped.
///
/// Unless the command finished on its own, the teardown command is also
/// started, detached.
struct ProcessGuard {
    pid: Option<u32>,
    teardown: Teardown,
    settled: bool,
}

impl ProcessGuard {
    fn new(pid: Option<u32>, teardown: Teardown) -> Self {
        Self {
            pid,
            teardown,
            settled: false,
        }
    }

    /// The command exited; sweep leftovers only.
    fn finish(mut self) {
        self.settled = true;
    }

    /// Run the teardown command to completion, then kill the group.
    async fn stop(mut self) {
        if let Some(mut cmd) = self.teardown_command() {
            match cmd.status().await {
                Ok(status) if !status.success() => {
                    warn!(status = %status, "teardown command failed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to run teardown command"),
            }
        }
        self.settled = true;
    }

    fn teardown_command(&self) -> Option<Command> {
        self.teardown_std_command().map(Command::from)
    }

    fn teardown_std_command(&self) -> Option<std::process::Command> {
        match &self.teardown {
            Teardown::ProcessGroup => None,
            Teardown::Command { program, args } => {
                let mut cmd = std::process::Command::new(program);
                cmd.args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
                Some(cmd)
            }
        }
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        if let Some(pid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: kill(2) only sends a signal; a negative pid addresses
            // the process group the command leads.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        // A std child survives runtime shutdown.
        if !self.settled
            && let Some(mut cmd) = self.teardown_std_command()
            && let Err(e) = cmd.spawn()
        {
            warn!(error = %e, "failed to start teardown command");
        }
        self.kill_group();
    }
}

/// Spawn a prepared command, wait for it, and capture its output.
///
/// The command leads its own process group. When it times out or the
/// returned future is dropped, the whole group is killed and `teardown`
/// runs.
pub(crate) async fn run_process(
    mut cmd: Command,
    program: &str,
    invocation: &ContainerInvocation,
    teardown: Teardown,
) -> Result<RuntimeOutcome, RuntimeError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|source| RuntimeError::Launch {
        program: program.to_string(),
        source,
    })?;
    let guard = ProcessGuard::new(child.id(), teardown);

    let wait = child.wait_with_output();
    let output = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(output) => output,
            Err(_) => {
                debug!(task = %invocation.task_id, ?limit, "stopping timed out command");
                guard.stop().await;
                return Err(RuntimeError::Timeout(limit));
            }
        },
        None => wait.await,
    };
    guard.finish();

    let output = output
        .map_err(|e| RuntimeError::Other(format!("failed waiting for '{}': {}", program, e)))?;

    Ok(RuntimeOutcome {
        // Killed by a signal.
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        outputs: capture_outputs(&invocation.work_dir, &invocation.outputs),
    })
}
