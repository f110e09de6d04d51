use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Delivers a message to the owner of a VPS.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, owner: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner: &str, message: &str) -> Result<(), NotifyError> {
        tracing::info!(owner, message, "owner notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    owner: &'a str,
    message: &'a str,
}

/// POSTs `{"owner", "message"}` JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, owner: &str, message: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&WebhookBody { owner, message })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Notify and log failures; a notification never undoes the state change it reports.
pub async fn notify_owner(notifier: &dyn Notifier, owner: &str, vps_id: &str, message: &str) {
    if let Err(e) = notifier.notify(owner, message).await {
        tracing::warn!(owner, vps_id, error = %e, "failed to notify owner");
    }
}

#[cfg(test)]
pub mod testing {
    use tokio::sync::Mutex;

    use super::*;

    /// Records every notification; optionally fails all of them after recording.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        failing: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        pub async fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().await.clone()
        }

        pub async fn sent_to(&self, owner: &str) -> Vec<String> {
            self.sent
                .lock()
                .await
                .iter()
                .filter(|(o, _)| o == owner)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, owner: &str, message: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .await
                .push((owner.to_string(), message.to_string()));
            if self.failing {
                return Err(NotifyError::Rejected {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "down".into(),
                });
            }
            Ok(())
        }
    }
}
