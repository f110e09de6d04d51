//! The provisioning workflow: image → volume → system container → guest
//! bootstrap → remote-access session.
//!
//! Stages run in order and are not transactional. A failed stage aborts the
//! run and leaves whatever earlier stages created in place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vd_store::models::{OsKind, container_name, volume_name};

use crate::session::{SessionError, SessionManager};
use crate::types::ContainerSpec;
use crate::{ContainerRuntime, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveImage,
    PullImage,
    CreateVolume,
    LaunchContainer,
    Bootstrap,
    OpenSession,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveImage => "resolve-image",
            Self::PullImage => "pull-image",
            Self::CreateVolume => "create-volume",
            Self::LaunchContainer => "launch-container",
            Self::Bootstrap => "bootstrap",
            Self::OpenSession => "open-session",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Runtime(#[from] Error),

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, thiserror::Error)]
#[error("provisioning failed at {stage}: {source}")]
pub struct ProvisionError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl ProvisionError {
    pub fn is_timeout(&self) -> bool {
        match &self.source {
            StageError::Runtime(e) => e.is_timeout(),
            StageError::Session(SessionError::NotReady { .. }) => true,
            StageError::Session(SessionError::Start(e) | SessionError::Terminate(e)) => {
                e.is_timeout()
            }
        }
    }
}

/// Result of one best-effort bootstrap step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    SoftFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: &'static str,
    pub outcome: StepOutcome,
}

/// Outcomes of every bootstrap step, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub steps: Vec<StepReport>,
}

impl ProvisionReport {
    pub fn soft_failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::SoftFailed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.soft_failures().next().is_none()
    }
}

/// Guest bootstrap settings.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Timeout for each bootstrap command; package installs are slow.
    pub timeout: Duration,
    /// Fallback login account created in every guest.
    pub user: String,
    pub password: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            user: "vpsuser".into(),
            password: "password".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub vps_id: String,
    pub ram_mb: u32,
    pub cpu_cores: u32,
    pub disk_gb: u32,
    pub os: OsKind,
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub container_name: String,
    pub container_id: String,
    pub volume_name: String,
    pub image: &'static str,
    pub access_secret: String,
    pub report: ProvisionReport,
}

pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    sessions: Arc<SessionManager>,
    bootstrap: BootstrapConfig,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sessions: Arc<SessionManager>,
        bootstrap: BootstrapConfig,
    ) -> Self {
        Self {
            runtime,
            sessions,
            bootstrap,
        }
    }

    pub async fn provision(&self, req: &ProvisionRequest) -> Result<Provisioned, ProvisionError> {
        let vps_id = req.vps_id.as_str();
        let name = container_name(vps_id);
        let volume = volume_name(vps_id);
        // Resources created so far, named in the log if a later stage fails.
        let mut created: Vec<String> = Vec::new();

        let image = req.os.base_image();
        info!(
            vps_id,
            stage = %Stage::ResolveImage,
            os = %req.os,
            image,
            ram_mb = req.ram_mb,
            cpu_cores = req.cpu_cores,
            disk_gb = req.disk_gb,
            "provisioning"
        );

        self.runtime
            .pull_image(image)
            .await
            .map_err(|e| abort(vps_id, Stage::PullImage, e.into(), &created))?;

        self.runtime
            .create_volume(&volume)
            .await
            .map_err(|e| abort(vps_id, Stage::CreateVolume, e.into(), &created))?;
        created.push(format!("volume {volume}"));

        let spec = ContainerSpec {
            name: name.clone(),
            image: image.to_string(),
            memory_mb: req.ram_mb,
            cpus: req.cpu_cores,
            volume: volume.clone(),
        };
        let container_id = self
            .runtime
            .launch(&spec)
            .await
            .map_err(|e| abort(vps_id, Stage::LaunchContainer, e.into(), &created))?;
        created.push(format!("container {name}"));

        info!(vps_id, stage = %Stage::Bootstrap, container = %name, "bootstrapping guest");
        let report = self.bootstrap(&name).await;
        if !report.is_clean() {
            warn!(
                vps_id,
                soft_failures = report.soft_failures().count(),
                "guest bootstrap finished with failures"
            );
        }

        let access_secret = self
            .sessions
            .create_session(&name)
            .await
            .map_err(|e| abort(vps_id, Stage::OpenSession, e.into(), &created))?;

        info!(vps_id, container = %name, container_id = %container_id, "provisioned");

        Ok(Provisioned {
            container_name: name,
            container_id,
            volume_name: volume,
            image,
            access_secret,
            report,
        })
    }

    /// Install the login stack. Every step runs regardless of earlier failures.
    async fn bootstrap(&self, container: &str) -> ProvisionReport {
        let cfg = &self.bootstrap;
        let set_password = chpasswd_script(&cfg.user, &cfg.password);
        let steps: [(&'static str, Vec<&str>); 7] = [
            ("apt-get update", vec!["apt-get", "update", "-y"]),
            (
                "install packages",
                vec![
                    "apt-get",
                    "install",
                    "-y",
                    "--no-install-recommends",
                    "systemd",
                    "openssh-server",
                    "tmate",
                    "wget",
                    "ca-certificates",
                    "gnupg",
                    "lsb-release",
                ],
            ),
            ("create sshd dir", vec!["mkdir", "-p", "/var/run/sshd"]),
            (
                "create login user",
                vec!["useradd", "-m", "-s", "/bin/bash", cfg.user.as_str()],
            ),
            ("set login password", vec!["sh", "-c", set_password.as_str()]),
            ("enable ssh", vec!["systemctl", "enable", "ssh"]),
            ("start ssh", vec!["systemctl", "start", "ssh"]),
        ];

        let mut report = ProvisionReport::default();
        for (step, cmd) in steps {
            let outcome = match self.runtime.exec(container, &cmd, cfg.timeout).await {
                Ok(_) => StepOutcome::Ok,
                Err(e) => {
                    warn!(container, step, error = %e, "bootstrap step failed");
                    StepOutcome::SoftFailed(e.to_string())
                }
            };
            report.steps.push(StepReport { step, outcome });
        }
        report
    }
}

/// `sh -c` script feeding `user:password` to chpasswd, safe for any quote characters.
fn chpasswd_script(user: &str, password: &str) -> String {
    format!("printf '%s\\n' {} | chpasswd", shell_quote(&format!("{user}:{password}")))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn abort(vps_id: &str, stage: Stage, source: StageError, created: &[String]) -> ProvisionError {
    if created.is_empty() {
        warn!(vps_id, %stage, error = %source, "provisioning aborted");
    } else {
        warn!(
            vps_id,
            %stage,
            error = %source,
            left_behind = ?created,
            "provisioning aborted; created resources are left in place"
        );
    }
    ProvisionError { stage, source }
}
