//! Remote-access sessions: a detached tmate server inside the guest whose
//! public SSH string is the VPS access secret.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::{ContainerRuntime, Error};

/// Control socket shared by every tmate invocation in the guest.
pub const TMATE_SOCKET: &str = "/tmp/tmate.sock";

/// How long to wait for a freshly started session to publish its SSH string.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Timeout for each individual `display` query.
    pub poll_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to terminate previous session: {0}")]
    Terminate(#[source] Error),

    #[error("failed to start session: {0}")]
    Start(#[source] Error),

    #[error("no connection string after {attempts} attempts")]
    NotReady { attempts: u32 },
}

pub struct SessionManager {
    runtime: Arc<dyn ContainerRuntime>,
    policy: RetryPolicy,
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: RetryPolicy) -> Self {
        Self { runtime, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a session, clearing any stale one first on a best-effort basis.
    pub async fn create_session(&self, container: &str) -> Result<String, SessionError> {
        if let Err(e) = self.terminate(container).await {
            debug!(container, error = %e, "ignoring failure to clear stale session");
        }
        self.open(container).await
    }

    /// Kill the current session and start a new one. The kill must succeed:
    /// the caller wants the old string invalidated.
    pub async fn regenerate_session(&self, container: &str) -> Result<String, SessionError> {
        self.terminate(container)
            .await
            .map_err(SessionError::Terminate)?;
        self.open(container).await
    }

    async fn terminate(&self, container: &str) -> crate::Result<()> {
        match self
            .runtime
            .exec(container, &["pkill", "-f", "tmate"], self.policy.poll_timeout)
            .await
        {
            Ok(_) => Ok(()),
            // pkill exits 1 silently when nothing matched.
            Err(Error::Runtime(docker_cli::Error::Command {
                exit_code: Some(1),
                output,
                ..
            })) if output.trim().is_empty() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn open(&self, container: &str) -> Result<String, SessionError> {
        self.runtime
            .exec_detached(container, &["tmate", "-S", TMATE_SOCKET, "new-session", "-d"])
            .await
            .map_err(SessionError::Start)?;

        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            match self
                .runtime
                .exec(
                    container,
                    &["tmate", "-S", TMATE_SOCKET, "display", "-p", "#{tmate_ssh}"],
                    self.policy.poll_timeout,
                )
                .await
            {
                Ok(out) if !out.trim().is_empty() => {
                    info!(container, attempt, "tmate session ready");
                    return Ok(out.trim().to_string());
                }
                Ok(_) => debug!(container, attempt, "tmate session not ready yet"),
                Err(e) => debug!(container, attempt, error = %e, "tmate display failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        Err(SessionError::NotReady { attempts })
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::testing::FakeRuntime;

    async fn running(runtime: &Arc<FakeRuntime>) -> String {
        runtime.add_running("vps_1").await;
        "vps_1".to_string()
    }

    fn manager(runtime: Arc<FakeRuntime>) -> SessionManager {
        SessionManager::new(runtime, RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_non_empty_string() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.session_ready_after(3).await;
        let container = running(&runtime).await;

        let started = Instant::now();
        let ssh = manager(runtime.clone())
            .create_session(&container)
            .await
            .unwrap();

        assert!(ssh.starts_with("ssh "));
        // Three empty polls, each followed by one interval.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.session_never_ready().await;
        let container = running(&runtime).await;

        let started = Instant::now();
        let err = manager(runtime.clone())
            .create_session(&container)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::NotReady { attempts: 12 }));
        assert_eq!(started.elapsed(), Duration::from_secs(11));
        let polls = runtime
            .calls()
            .await
            .into_iter()
            .filter(|c| c.contains("display"))
            .count();
        assert_eq!(polls, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn create_ignores_kill_failures() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = running(&runtime).await;
        runtime.fail_exec("pkill").await;

        let ssh = manager(runtime.clone())
            .create_session(&container)
            .await
            .unwrap();
        assert!(!ssh.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_requires_the_kill() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = running(&runtime).await;
        runtime.fail_exec("pkill").await;

        let err = manager(runtime.clone())
            .regenerate_session(&container)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Terminate(_)));
        assert!(!runtime.calls().await.iter().any(|c| c.contains("new-session")));
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_with_no_live_session_still_succeeds() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = running(&runtime).await;

        let ssh = manager(runtime.clone())
            .regenerate_session(&container)
            .await
            .unwrap();
        assert!(!ssh.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_yields_a_fresh_string() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = running(&runtime).await;
        let sessions = manager(runtime.clone());

        let first = sessions.create_session(&container).await.unwrap();
        let second = sessions.regenerate_session(&container).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_is_reported() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = running(&runtime).await;
        runtime.fail_exec("tmate -S /tmp/tmate.sock new-session").await;

        let err = manager(runtime)
            .create_session(&container)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Start(_)));
    }
}
