//! Docker-compatible container runtime.
//!
//! Each task becomes one `docker run --rm` invocation. The run workspace is
//! bind-mounted at the same path inside the container, so the rendered
//! command can use host paths for upstream artifacts unchanged. CPU and
//! memory requests become `--cpus` and `--memory` limits; disk is enforced
//! only by the executor's reservation pool.
//!
//! Containers are named `vessel-<run>-<task>`. Killing the client does not
//! stop a container, so a timeout or cancellation runs `docker kill` on that
//! name.
//!
//! Any CLI that accepts `docker run` syntax (such as `podman`) works via
//! [`DockerRuntime::with_binary`].

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::runtime::{
    ContainerInvocation, ContainerRuntime, RuntimeError, RuntimeOutcome, Teardown, run_process,
};

/// Name of the container running one task of one run.
pub fn container_name(invocation: &ContainerInvocation) -> String {
    format!("vessel-{}-{}", invocation.run_id, invocation.task_id)
}

/// Runs tasks through the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    extra_args: Vec<String>,
}

impl DockerRuntime {
    /// Use the `docker` binary on `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different docker-compatible binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    /// Builder: pass an extra argument to `run` before the image.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Get the runtime binary.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Arguments passed to the binary for an invocation.
    pub fn command_args(&self, invocation: &ContainerInvocation) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name(invocation),
        ];

        if invocation.resources.cpu_count > 0 {
            args.push("--cpus".to_string());
            args.push(invocation.resources.cpu_count.to_string());
        }
        if invocation.resources.memory_bytes > 0 {
            args.push("--memory".to_string());
            args.push(format!("{}b", invocation.resources.memory_bytes));
        }

        for mount in &invocation.mounts {
            args.push("-v".to_string());
            args.push(format!("{0}:{0}", mount.display()));
        }

        args.push("-w".to_string());
        args.push(invocation.work_dir.display().to_string());

        for (key, value) in invocation.environment.iter() {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend(self.extra_args.iter().cloned());
        args.push(invocation.image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(invocation.command.clone());
        args
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<RuntimeOutcome, RuntimeError> {
        let args = self.command_args(invocation);
        debug!(
            task = %invocation.task_id,
            image = %invocation.image,
            binary = %self.binary,
            "launching container"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args);
        let teardown = Teardown::Command {
            program: self.binary.clone(),
            args: vec!["kill".to_string(), container_name(invocation)],
        };
        run_process(cmd, &self.binary, invocation, teardown).await
    }
}
