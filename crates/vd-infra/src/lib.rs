pub mod docker;
pub mod provision;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use types::ContainerSpec;

pub use provision::{
    BootstrapConfig, ProvisionError, ProvisionReport, ProvisionRequest, Provisioned, Provisioner,
    Stage, StepOutcome,
};
pub use session::{RetryPolicy, SessionError, SessionManager};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container runtime error: {0}")]
    Runtime(#[from] docker_cli::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Runtime(e) => e.is_timeout(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Backend-agnostic interface to the container runtime hosting VPS units.
///
/// Every method is one discrete runtime invocation. Callers decide which
/// failures are fatal; implementations never retry.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Make `image` available locally. Idempotent.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a named persistent volume.
    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Launch a privileged system container running a full init. Returns the container id.
    async fn launch(&self, spec: &ContainerSpec) -> Result<String>;

    /// Run a command inside a running container and return its output.
    async fn exec(&self, container: &str, cmd: &[&str], timeout: Duration) -> Result<String>;

    /// Start a command inside a running container without waiting for it.
    async fn exec_detached(&self, container: &str, cmd: &[&str]) -> Result<()>;

    async fn pause(&self, container: &str) -> Result<()>;

    async fn unpause(&self, container: &str) -> Result<()>;

    async fn stop(&self, container: &str) -> Result<()>;

    async fn remove(&self, container: &str) -> Result<()>;

    /// Whether the runtime still knows a container by this name.
    async fn exists(&self, container: &str) -> Result<bool>;

    /// Runtime identifier for logs.
    fn name(&self) -> &'static str;
}
