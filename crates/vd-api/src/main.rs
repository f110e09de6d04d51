mod auth;
mod config;
mod dto;
mod error;
mod lifecycle;
mod monitor;
mod notify;
mod routes;
mod state;

use std::sync::Arc;

use docker_cli::DockerClient;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use vd_infra::ContainerRuntime;
use vd_infra::docker::DockerRuntime;
use vd_store::Store;

use crate::config::AppConfig;
use crate::lifecycle::audit_records;
use crate::monitor::spawn_reconciler;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;

    let store = Arc::new(Store::open(&config.data_file).await?);
    tracing::info!(
        path = %config.data_file.display(),
        records = store.list_all().await.len(),
        "record store loaded"
    );

    let client = DockerClient::new(config.docker_bin.clone(), config.command_timeout);
    let runtime = Arc::new(DockerRuntime::new(client));
    tracing::info!(runtime = runtime.name(), bin = %config.docker_bin, "container runtime ready");

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "owner notifications go to webhook");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let state = AppState::new(config.clone(), store, runtime, notifier);

    let dangling = audit_records(&state).await;
    if !dangling.is_empty() {
        tracing::warn!(count = dangling.len(), "records without containers; expiry will clear them");
    }

    spawn_reconciler(state.clone(), config.expiry_interval);

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "starting vpsdeck API");

    axum::serve(listener, app).await?;
    Ok(())
}
