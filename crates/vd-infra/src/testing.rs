//! In-memory [`ContainerRuntime`] that behaves like a small docker daemon
//! with tmate installed in every guest.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::ContainerSpec;
use crate::{ContainerRuntime, Error, Result};

#[derive(Debug, Clone)]
struct FakeSession {
    ssh: String,
    polls: u32,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: Option<ContainerSpec>,
    running: bool,
    paused: bool,
    session: Option<FakeSession>,
}

#[derive(Debug, Default)]
struct State {
    images: HashSet<String>,
    volumes: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    calls: Vec<String>,
    failing_ops: HashSet<String>,
    failing_exec: Vec<String>,
    /// Empty `display` polls before the string shows up; `None` means never.
    ready_after: Option<u32>,
    launched: u64,
    sessions: u64,
}

pub struct FakeRuntime {
    state: Mutex<State>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(output: &str) -> Error {
    Error::Runtime(docker_cli::Error::Command {
        command: "fake".into(),
        exit_code: Some(1),
        output: output.into(),
    })
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ready_after: Some(0),
                ..State::default()
            }),
        }
    }

    /// Register an already running container that was not launched through this runtime.
    pub async fn add_running(&self, name: &str) {
        self.state.lock().await.containers.insert(
            name.to_string(),
            FakeContainer {
                spec: None,
                running: true,
                paused: false,
                session: None,
            },
        );
    }

    pub async fn session_ready_after(&self, polls: u32) {
        self.state.lock().await.ready_after = Some(polls);
    }

    pub async fn session_never_ready(&self) {
        self.state.lock().await.ready_after = None;
    }

    /// Make one runtime operation fail: `pull`, `volume`, `launch`, `pause`,
    /// `unpause`, `stop` or `remove`.
    pub async fn fail_on(&self, op: &str) {
        self.state.lock().await.failing_ops.insert(op.to_string());
    }

    /// Make every guest command starting with `prefix` fail.
    pub async fn fail_exec(&self, prefix: &str) {
        self.state.lock().await.failing_exec.push(prefix.to_string());
    }

    /// Every invocation so far, rendered like a docker command line without the binary.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn is_paused(&self, name: &str) -> bool {
        self.state
            .lock()
            .await
            .containers
            .get(name)
            .is_some_and(|c| c.paused)
    }

    pub async fn launched_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .await
            .containers
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    pub async fn has_image(&self, image: &str) -> bool {
        self.state.lock().await.images.contains(image)
    }

    pub async fn has_volume(&self, volume: &str) -> bool {
        self.state.lock().await.volumes.contains(volume)
    }
}

impl State {
    fn check_op(&self, op: &str) -> Result<()> {
        if self.failing_ops.contains(op) {
            return Err(failure(&format!("Error response from daemon: {op} failed")));
        }
        Ok(())
    }

    fn check_exec(&self, line: &str) -> Result<()> {
        if self.failing_exec.iter().any(|p| line.starts_with(p.as_str())) {
            return Err(failure("fake failure"));
        }
        Ok(())
    }

    fn live_container(&mut self, name: &str) -> Result<&mut FakeContainer> {
        let container = self
            .containers
            .get_mut(name)
            .ok_or_else(|| failure(&format!("Error response from daemon: No such container: {name}")))?;
        if container.paused {
            return Err(failure(&format!(
                "Error response from daemon: Container {name} is paused, unpause the container before exec"
            )));
        }
        if !container.running {
            return Err(failure(&format!(
                "Error response from daemon: container {name} is not running"
            )));
        }
        Ok(container)
    }

    fn existing(&mut self, name: &str) -> Result<&mut FakeContainer> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| failure(&format!("Error response from daemon: No such container: {name}")))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("pull {image}"));
        state.check_op("pull")?;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("volume create {name}"));
        state.check_op("volume")?;
        state.volumes.insert(name.to_string());
        Ok(())
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("run {}", spec.name));
        state.check_op("launch")?;
        if state.containers.contains_key(&spec.name) {
            return Err(failure(&format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        state.launched += 1;
        let id = format!("{:064x}", state.launched);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: Some(spec.clone()),
                running: true,
                paused: false,
                session: None,
            },
        );
        Ok(id)
    }

    async fn exec(&self, container: &str, cmd: &[&str], _timeout: Duration) -> Result<String> {
        let mut state = self.state.lock().await;
        let line = cmd.join(" ");
        state.calls.push(format!("exec {container} {line}"));
        state.check_exec(&line)?;
        let ready_after = state.ready_after;
        let target = state.live_container(container)?;

        match cmd {
            ["pkill", ..] => match target.session.take() {
                Some(_) => Ok(String::new()),
                None => Err(failure("")),
            },
            ["tmate", .., "display", _, _] => match target.session.as_mut() {
                Some(session) => {
                    session.polls += 1;
                    match ready_after {
                        Some(n) if session.polls > n => Ok(format!("{}\n", session.ssh)),
                        _ => Ok(String::new()),
                    }
                }
                None => Err(failure("no server running on /tmp/tmate.sock")),
            },
            _ => Ok(String::new()),
        }
    }

    async fn exec_detached(&self, container: &str, cmd: &[&str]) -> Result<()> {
        let mut state = self.state.lock().await;
        let line = cmd.join(" ");
        state.calls.push(format!("exec -d {container} {line}"));
        state.check_exec(&line)?;
        state.sessions += 1;
        let ssh = format!("ssh fake{:04}{container}@lon1.tmate.io", state.sessions);
        let target = state.live_container(container)?;
        if cmd.contains(&"new-session") {
            target.session = Some(FakeSession { ssh, polls: 0 });
        }
        Ok(())
    }

    async fn pause(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("pause {container}"));
        state.check_op("pause")?;
        let target = state.live_container(container)?;
        target.paused = true;
        Ok(())
    }

    async fn unpause(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("unpause {container}"));
        state.check_op("unpause")?;
        let target = state.existing(container)?;
        if !target.paused {
            return Err(failure(&format!(
                "Error response from daemon: Container {container} is not paused"
            )));
        }
        target.paused = false;
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("stop {container}"));
        state.check_op("stop")?;
        let target = state.existing(container)?;
        target.running = false;
        target.paused = false;
        target.session = None;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("rm {container}"));
        state.check_op("remove")?;
        if state.existing(container)?.running {
            return Err(failure(&format!(
                "Error response from daemon: cannot remove container \"/{container}\": container is running"
            )));
        }
        state.containers.remove(container);
        Ok(())
    }

    async fn exists(&self, container: &str) -> Result<bool> {
        Ok(self.state.lock().await.containers.contains_key(container))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
