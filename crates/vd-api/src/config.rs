use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vd_infra::{BootstrapConfig, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is not valid: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub api_key: String,
    pub data_file: PathBuf,
    pub docker_bin: String,
    pub command_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub guest_user: String,
    pub guest_password: String,
    pub session_attempts: u32,
    pub session_interval: Duration,
    pub expiry_interval: Duration,
    pub notify_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            listen_addr: parsed("VPSDECK_LISTEN_ADDR", "0.0.0.0:8080")?,
            api_key: env::var("VPSDECK_API_KEY").map_err(|_| ConfigError::Missing("VPSDECK_API_KEY"))?,
            data_file: PathBuf::from(
                env::var("VPSDECK_DATA_FILE").unwrap_or_else(|_| "vps_data.json".into()),
            ),
            docker_bin: env::var("VPSDECK_DOCKER_BIN").unwrap_or_else(|_| "docker".into()),
            command_timeout: Duration::from_secs(parsed("VPSDECK_COMMAND_TIMEOUT_SECS", "300")?),
            bootstrap_timeout: Duration::from_secs(parsed(
                "VPSDECK_BOOTSTRAP_TIMEOUT_SECS",
                "600",
            )?),
            guest_user: env::var("VPSDECK_GUEST_USER").unwrap_or_else(|_| "vpsuser".into()),
            guest_password: env::var("VPSDECK_GUEST_PASSWORD")
                .unwrap_or_else(|_| "password".into()),
            session_attempts: parsed("VPSDECK_SESSION_ATTEMPTS", "12")?,
            session_interval: Duration::from_millis(parsed("VPSDECK_SESSION_INTERVAL_MS", "1000")?),
            expiry_interval: Duration::from_secs(parsed("VPSDECK_EXPIRY_INTERVAL_SECS", "60")?),
            notify_webhook_url: env::var("VPSDECK_NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.session_attempts.max(1),
            interval: self.session_interval,
            ..RetryPolicy::default()
        }
    }

    pub fn bootstrap(&self) -> BootstrapConfig {
        BootstrapConfig {
            timeout: self.bootstrap_timeout,
            user: self.guest_user.clone(),
            password: self.guest_password.clone(),
        }
    }
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(name).unwrap_or_else(|_| default.into());
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests(data_file: PathBuf) -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            api_key: "test-key".into(),
            data_file,
            docker_bin: "docker".into(),
            command_timeout: Duration::from_secs(5),
            bootstrap_timeout: Duration::from_secs(5),
            guest_user: "vpsuser".into(),
            guest_password: "password".into(),
            session_attempts: 12,
            session_interval: Duration::from_secs(1),
            expiry_interval: Duration::from_secs(60),
            notify_webhook_url: None,
        }
    }
}
