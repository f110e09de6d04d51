use std::time::Duration;

use async_trait::async_trait;
use docker_cli::{DockerClient, Mount, RunContainerRequest};
use tracing::info;

use crate::types::{ContainerSpec, DATA_PATH};
use crate::{ContainerRuntime, Result};

/// Container runtime backed by the local `docker` CLI.
///
/// Delegates to `docker_cli::DockerClient` for all process invocations.
pub struct DockerRuntime {
    client: DockerClient,
}

impl DockerRuntime {
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }

    /// Full `docker run` request for a systemd guest: privileged, with the
    /// data volume, tmpfs for `/run` and `/run/lock`, and the host cgroup
    /// tree mounted read-only so `/sbin/init` can manage services.
    fn run_request(spec: &ContainerSpec) -> RunContainerRequest {
        RunContainerRequest {
            name: spec.name.clone(),
            image: spec.image.clone(),
            memory_mb: spec.memory_mb,
            cpus: spec.cpus,
            privileged: true,
            mounts: vec![
                Mount::new(spec.volume.clone(), DATA_PATH),
                Mount::new("/sys/fs/cgroup", "/sys/fs/cgroup").read_only(),
            ],
            tmpfs: vec!["/run".into(), "/run/lock".into()],
            command: vec!["/sbin/init".into()],
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.client.pull_image(image).await?;
        info!(image, "docker: image pulled");
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.client.create_volume(name).await?;
        info!(volume = name, "docker: volume created");
        Ok(())
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self.client.run_container(&Self::run_request(spec)).await?;
        info!(container = %spec.name, container_id = %id, "docker: container started");
        Ok(id)
    }

    async fn exec(&self, container: &str, cmd: &[&str], timeout: Duration) -> Result<String> {
        Ok(self.client.exec(container, cmd, timeout).await?)
    }

    async fn exec_detached(&self, container: &str, cmd: &[&str]) -> Result<()> {
        Ok(self.client.exec_detached(container, cmd).await?)
    }

    async fn pause(&self, container: &str) -> Result<()> {
        self.client.pause(container).await?;
        info!(container, "docker: container paused");
        Ok(())
    }

    async fn unpause(&self, container: &str) -> Result<()> {
        self.client.unpause(container).await?;
        info!(container, "docker: container unpaused");
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.client.stop(container).await?;
        info!(container, "docker: container stopped");
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.client.remove(container).await?;
        info!(container, "docker: container removed");
        Ok(())
    }

    async fn exists(&self, container: &str) -> Result<bool> {
        Ok(self.client.status(container).await?.is_some())
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_builds_a_system_container() {
        let spec = ContainerSpec {
            name: "vps_0badf00d".into(),
            image: "debian:12".into(),
            memory_mb: 2048,
            cpus: 2,
            volume: "vol_0badf00d".into(),
        };
        let args = DockerRuntime::run_request(&spec).to_args();

        assert!(args.contains(&"--privileged".to_string()));
        assert!(args.contains(&"--memory=2048m".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
        assert!(args.contains(&"vol_0badf00d:/var/lib/vpsdata".to_string()));
        assert!(args.contains(&"/sys/fs/cgroup:/sys/fs/cgroup:ro".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "--tmpfs").count(), 2);
        assert_eq!(&args[args.len() - 2..], ["debian:12", "/sbin/init"]);
    }
}
