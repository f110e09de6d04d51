//! Typed Rust client for the `docker` command-line interface.
//!
//! Covers the subset needed for managing VPS containers: images (pull),
//! volumes (create), containers (run, exec, pause, unpause, stop, rm,
//! inspect). Every call is a discrete process invocation with a timeout;
//! results are exit codes and captured text, never structured output.

pub mod exec;
mod types;

use std::time::Duration;

pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`{command}` failed ({}): {output}", exit_label(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` could not be run: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Captured output of a failed command, if it got far enough to produce any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Command { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {code}"),
        None => "killed by signal".into(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for a local docker binary.
#[derive(Debug, Clone)]
pub struct DockerClient {
    bin: String,
    timeout: Duration,
}

impl DockerClient {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    async fn docker(&self, args: Vec<String>) -> Result<String> {
        exec::run(&self.bin, &args, self.timeout).await
    }

    // ── Images & volumes ─────────────────────────────────────────────

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        self.docker(vec!["pull".into(), image.into()]).await?;
        Ok(())
    }

    pub async fn create_volume(&self, name: &str) -> Result<()> {
        self.docker(vec!["volume".into(), "create".into(), name.into()])
            .await?;
        Ok(())
    }

    // ── Containers ───────────────────────────────────────────────────

    /// Start a detached container and return its id.
    pub async fn run_container(&self, req: &RunContainerRequest) -> Result<String> {
        let out = self.docker(req.to_args()).await?;
        Ok(out.trim().to_string())
    }

    /// Run `cmd` inside a running container and wait for it.
    pub async fn exec(&self, container: &str, cmd: &[&str], timeout: Duration) -> Result<String> {
        exec::run(&self.bin, &exec_args(container, cmd, false), timeout).await
    }

    /// Start `cmd` inside a running container without waiting for it to finish.
    pub async fn exec_detached(&self, container: &str, cmd: &[&str]) -> Result<()> {
        self.docker(exec_args(container, cmd, true)).await?;
        Ok(())
    }

    pub async fn pause(&self, container: &str) -> Result<()> {
        self.docker(vec!["pause".into(), container.into()]).await?;
        Ok(())
    }

    pub async fn unpause(&self, container: &str) -> Result<()> {
        self.docker(vec!["unpause".into(), container.into()]).await?;
        Ok(())
    }

    pub async fn stop(&self, container: &str) -> Result<()> {
        self.docker(vec!["stop".into(), container.into()]).await?;
        Ok(())
    }

    pub async fn remove(&self, container: &str) -> Result<()> {
        self.docker(vec!["rm".into(), container.into()]).await?;
        Ok(())
    }

    /// `State.Status` of a container, or `None` if docker does not know it.
    pub async fn status(&self, container: &str) -> Result<Option<String>> {
        let args = vec![
            "inspect".into(),
            "-f".into(),
            "{{.State.Status}}".into(),
            container.into(),
        ];
        match self.docker(args).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(Error::Command { ref output, .. }) if output.contains("No such") => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn exec_args(container: &str, cmd: &[&str], detached: bool) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if detached {
        args.push("-d".into());
    }
    args.push(container.into());
    args.extend(cmd.iter().map(|s| s.to_string()));
    args
}
