use std::sync::Arc;

use vd_infra::{ContainerRuntime, Provisioner, SessionManager};
use vd_store::Store;

use crate::config::AppConfig;
use crate::lifecycle::OpLocks;
use crate::notify::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub sessions: Arc<SessionManager>,
    pub provisioner: Arc<Provisioner>,
    pub notifier: Arc<dyn Notifier>,
    pub locks: OpLocks,
    pub config: AppConfig,
}

impl AppState {
    /// Wire the core components around one runtime.
    pub fn new(
        config: AppConfig,
        store: Arc<Store>,
        runtime: Arc<dyn ContainerRuntime>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(runtime.clone(), config.retry_policy()));
        let provisioner = Arc::new(Provisioner::new(
            runtime.clone(),
            sessions.clone(),
            config.bootstrap(),
        ));
        Self {
            store,
            runtime,
            sessions,
            provisioner,
            notifier,
            locks: OpLocks::default(),
            config,
        }
    }
}

#[cfg(test)]
pub mod testing {
    use vd_infra::testing::FakeRuntime;

    use super::*;
    use crate::notify::testing::RecordingNotifier;

    pub struct Harness {
        pub state: AppState,
        pub runtime: Arc<FakeRuntime>,
        pub notifier: Arc<RecordingNotifier>,
        pub dir: tempfile::TempDir,
    }

    pub async fn harness() -> Harness {
        harness_with(RecordingNotifier::default()).await
    }

    pub async fn harness_with(notifier: RecordingNotifier) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_tests(dir.path().join("vps_data.json"));
        let store = Arc::new(Store::open(&config.data_file).await.unwrap());
        let runtime = Arc::new(FakeRuntime::new());
        let notifier = Arc::new(notifier);
        let state = AppState::new(config, store, runtime.clone(), notifier.clone());
        Harness {
            state,
            runtime,
            notifier,
            dir,
        }
    }
}
