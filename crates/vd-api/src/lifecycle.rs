//! Lifecycle operations on VPS records: create, suspend, resume and
//! regenerate access. Expiry lives in [`crate::monitor`].
//!
//! Every operation on an existing id runs under that id's [`OpLocks`] entry
//! and re-reads the record once it holds the lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use vd_infra::{ProvisionError, ProvisionReport, ProvisionRequest, SessionError};
use vd_store::models::{OsKind, VpsRecord, new_vps_id, whole_seconds};

use crate::notify::notify_owner;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] vd_store::Error),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Runtime(#[from] vd_infra::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Per-id mutual exclusion for lifecycle operations.
#[derive(Clone, Default)]
pub struct OpLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl OpLocks {
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for an id that no longer exists.
    pub async fn forget(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[derive(Debug, Clone)]
pub struct CreateVps {
    pub owner: String,
    pub ram_mb: u32,
    pub cpu_cores: u32,
    pub disk_gb: u32,
    pub os: String,
    pub days: u32,
}

#[derive(Debug, Clone)]
pub struct Created {
    pub record: VpsRecord,
    pub report: ProvisionReport,
}

/// Provision a VPS and record it. Nothing is recorded unless every
/// provisioning stage succeeded.
pub async fn create_vps(state: &AppState, req: CreateVps) -> Result<Created> {
    let os: OsKind = req.os.parse()?;
    if req.ram_mb == 0 || req.cpu_cores == 0 {
        return Err(LifecycleError::Invalid(
            "ram_mb and cpu_cores must be positive".into(),
        ));
    }
    if req.days == 0 {
        return Err(LifecycleError::Invalid("days must be positive".into()));
    }
    if req.owner.trim().is_empty() {
        return Err(LifecycleError::Invalid("owner must be set".into()));
    }
    let ttl = Duration::days(i64::from(req.days));
    let out_of_range = || LifecycleError::Invalid(format!("{} days is out of range", req.days));
    if Utc::now().checked_add_signed(ttl).is_none() {
        return Err(out_of_range());
    }

    let mut vps_id = new_vps_id();
    while state.store.get(&vps_id).await.is_some() {
        vps_id = new_vps_id();
    }

    info!(vps_id = %vps_id, owner = %req.owner, days = req.days, "creating VPS");

    let provisioned = state
        .provisioner
        .provision(&ProvisionRequest {
            vps_id: vps_id.clone(),
            ram_mb: req.ram_mb,
            cpu_cores: req.cpu_cores,
            disk_gb: req.disk_gb,
            os,
        })
        .await?;

    let created_at = whole_seconds(Utc::now());
    let expires_at = created_at.checked_add_signed(ttl).ok_or_else(out_of_range)?;

    let record = VpsRecord {
        id: vps_id.clone(),
        owner: req.owner,
        container_name: provisioned.container_name,
        container_id: provisioned.container_id,
        volume_name: provisioned.volume_name,
        ram_mb: req.ram_mb,
        cpu_cores: req.cpu_cores,
        disk_gb: req.disk_gb,
        os,
        created_at,
        expires_at,
        suspended: false,
        access_secret: provisioned.access_secret,
    };
    state.store.insert(record.clone()).await?;

    info!(vps_id = %vps_id, expires_at = %expires_at, "VPS created");

    notify_owner(
        &*state.notifier,
        &record.owner,
        &record.id,
        &format!(
            "Your VPS {} is ready ({} days).\nSSH:\n{}",
            record.id, req.days, record.access_secret
        ),
    )
    .await;

    Ok(Created {
        record,
        report: provisioned.report,
    })
}

/// Pause the container and mark the record suspended. Expiry is unaffected.
pub async fn suspend_vps(state: &AppState, id: &str) -> Result<VpsRecord> {
    let (_guard, record) = lock_record(state, id).await?;
    if record.suspended {
        return Err(LifecycleError::Conflict(format!("VPS {id} is already suspended")));
    }

    state.runtime.pause(&record.container_name).await?;
    let record = state.store.update(id, |r| r.suspended = true).await?;
    info!(vps_id = id, "VPS suspended");

    notify_owner(
        &*state.notifier,
        &record.owner,
        id,
        &format!("Your VPS {id} has been suspended by an administrator."),
    )
    .await;

    Ok(record)
}

/// Unpause a suspended VPS.
pub async fn resume_vps(state: &AppState, id: &str) -> Result<VpsRecord> {
    let (_guard, record) = lock_record(state, id).await?;
    if !record.suspended {
        return Err(LifecycleError::Conflict(format!("VPS {id} is not suspended")));
    }

    state.runtime.unpause(&record.container_name).await?;
    let record = state.store.update(id, |r| r.suspended = false).await?;
    info!(vps_id = id, "VPS resumed");

    notify_owner(
        &*state.notifier,
        &record.owner,
        id,
        &format!("Your VPS {id} has been resumed."),
    )
    .await;

    Ok(record)
}

/// Replace the access session, invalidating the previous connection string.
pub async fn regenerate_vps(state: &AppState, id: &str) -> Result<VpsRecord> {
    let (_guard, record) = lock_record(state, id).await?;
    // A paused container cannot run exec.
    if record.suspended {
        return Err(LifecycleError::Conflict(format!(
            "VPS {id} is suspended; resume it first"
        )));
    }

    let secret = state
        .sessions
        .regenerate_session(&record.container_name)
        .await?;
    let record = state
        .store
        .update(id, |r| r.access_secret = secret)
        .await?;
    info!(vps_id = id, "VPS access regenerated");

    notify_owner(
        &*state.notifier,
        &record.owner,
        id,
        &format!("New SSH for VPS {id}:\n{}", record.access_secret),
    )
    .await;

    Ok(record)
}

/// Log records whose container the runtime no longer knows about.
///
/// Run once after the store is rehydrated. Dangling records are left for
/// the expiry loop, which tolerates missing containers.
pub async fn audit_records(state: &AppState) -> Vec<String> {
    let mut dangling = Vec::new();
    for record in state.store.list_all().await {
        match state.runtime.exists(&record.container_name).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    vps_id = %record.id,
                    container = %record.container_name,
                    expires_at = %record.expires_at,
                    "record has no backing container"
                );
                dangling.push(record.id);
            }
            Err(e) => {
                warn!(vps_id = %record.id, error = %e, "could not check backing container");
            }
        }
    }
    dangling
}

/// Take the id's lock and re-read its record. Unknown ids leave no lock entry.
async fn lock_record(state: &AppState, id: &str) -> Result<(OwnedMutexGuard<()>, VpsRecord)> {
    let guard = state.locks.acquire(id).await;
    match state.store.get(id).await {
        Some(record) => Ok((guard, record)),
        None => {
            drop(guard);
            state.locks.forget(id).await;
            Err(vd_store::Error::NotFound(id.to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use vd_infra::ContainerRuntime;

    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::state::testing::{harness, harness_with};

    fn ubuntu_for(owner: &str) -> CreateVps {
        CreateVps {
            owner: owner.into(),
            ram_mb: 1024,
            cpu_cores: 1,
            disk_gb: 10,
            os: "ubuntu".into(),
            days: 7,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_records_a_reachable_vps() {
        let h = harness().await;
        let created = create_vps(&h.state, ubuntu_for("U")).await.unwrap();
        let record = created.record;

        assert_eq!(record.ram_mb, 1024);
        assert_eq!(record.os, OsKind::Ubuntu);
        assert_eq!(record.owner, "U");
        assert!(!record.suspended);
        assert!(!record.access_secret.is_empty());
        assert_eq!(record.expires_at - record.created_at, Duration::days(7));
        assert_eq!(record.container_name, format!("vps_{}", record.id));
        assert!(created.report.is_clean());

        assert_eq!(h.state.store.get(&record.id).await, Some(record.clone()));
        assert!(h.runtime.exists(&record.container_name).await.unwrap());
        let sent = h.notifier.sent_to("U").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(&record.access_secret));
    }

    #[tokio::test]
    async fn unknown_os_is_rejected_before_any_runtime_call() {
        let h = harness().await;
        let mut req = ubuntu_for("U");
        req.os = "windows".into();

        let err = create_vps(&h.state, req).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Store(vd_store::Error::UnknownOs(_))
        ));
        assert!(h.runtime.calls().await.is_empty());
        assert!(h.state.store.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn zero_days_or_resources_are_invalid() {
        let h = harness().await;
        for req in [
            CreateVps { days: 0, ..ubuntu_for("U") },
            CreateVps { ram_mb: 0, ..ubuntu_for("U") },
            CreateVps { cpu_cores: 0, ..ubuntu_for("U") },
            CreateVps { owner: " ".into(), ..ubuntu_for("U") },
        ] {
            assert!(matches!(
                create_vps(&h.state, req).await,
                Err(LifecycleError::Invalid(_))
            ));
        }
        assert!(h.runtime.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_provision_leaves_no_record() {
        let h = harness().await;
        h.runtime.session_never_ready().await;

        let err = create_vps(&h.state, ubuntu_for("U")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Provision(ref e) if e.stage == vd_infra::Stage::OpenSession));
        assert!(h.state.store.list_all().await.is_empty());
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_pauses_and_keeps_expiry() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;

        let suspended = suspend_vps(&h.state, &record.id).await.unwrap();
        assert!(suspended.suspended);
        assert_eq!(suspended.expires_at, record.expires_at);
        assert!(h.runtime.is_paused(&record.container_name).await);
        assert_eq!(h.state.store.get(&record.id).await, Some(suspended));
        assert_eq!(h.notifier.sent_to("U").await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_twice_is_a_conflict() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;
        suspend_vps(&h.state, &record.id).await.unwrap();

        assert!(matches!(
            suspend_vps(&h.state, &record.id).await,
            Err(LifecycleError::Conflict(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pause_leaves_record_running() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;
        h.runtime.fail_on("pause").await;

        assert!(matches!(
            suspend_vps(&h.state, &record.id).await,
            Err(LifecycleError::Runtime(_))
        ));
        assert!(!h.state.store.get(&record.id).await.unwrap().suspended);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_reverses_suspend() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;
        suspend_vps(&h.state, &record.id).await.unwrap();

        let resumed = resume_vps(&h.state, &record.id).await.unwrap();
        assert!(!resumed.suspended);
        assert!(!h.runtime.is_paused(&record.container_name).await);
        assert!(matches!(
            resume_vps(&h.state, &record.id).await,
            Err(LifecycleError::Conflict(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_replaces_only_the_secret() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;

        let regenerated = regenerate_vps(&h.state, &record.id).await.unwrap();
        assert_ne!(regenerated.access_secret, record.access_secret);
        assert_eq!(regenerated.owner, record.owner);
        assert_eq!(regenerated.expires_at, record.expires_at);
        assert_eq!(regenerated.suspended, record.suspended);

        let sent = h.notifier.sent_to("U").await;
        assert!(sent.last().unwrap().contains(&regenerated.access_secret));
    }

    #[tokio::test(start_paused = true)]
    async fn regenerate_refuses_a_suspended_vps() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;
        suspend_vps(&h.state, &record.id).await.unwrap();

        assert!(matches!(
            regenerate_vps(&h.state, &record.id).await,
            Err(LifecycleError::Conflict(_))
        ));
        let stored = h.state.store.get(&record.id).await.unwrap();
        assert_eq!(stored.access_secret, record.access_secret);
    }

    #[tokio::test]
    async fn out_of_range_days_are_rejected_before_any_runtime_call() {
        let h = harness().await;
        let err = create_vps(&h.state, CreateVps { days: u32::MAX, ..ubuntu_for("U") })
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Invalid(_)));
        assert!(h.runtime.calls().await.is_empty());
        assert!(h.state.store.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let h = harness().await;
        for result in [
            suspend_vps(&h.state, "deadbeef").await,
            resume_vps(&h.state, "deadbeef").await,
            regenerate_vps(&h.state, "deadbeef").await,
        ] {
            assert!(matches!(
                result,
                Err(LifecycleError::Store(vd_store::Error::NotFound(_)))
            ));
        }
        assert_eq!(h.state.locks.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_failures_do_not_undo_changes() {
        let h = harness_with(RecordingNotifier::failing()).await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;

        let suspended = suspend_vps(&h.state, &record.id).await.unwrap();
        assert!(suspended.suspended);
        assert_eq!(h.notifier.sent().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn audit_flags_records_without_containers() {
        let h = harness().await;
        let record = create_vps(&h.state, ubuntu_for("U")).await.unwrap().record;
        assert!(audit_records(&h.state).await.is_empty());

        h.runtime.stop(&record.container_name).await.unwrap();
        h.runtime.remove(&record.container_name).await.unwrap();
        assert_eq!(audit_records(&h.state).await, [record.id]);
    }

    #[tokio::test]
    async fn op_locks_serialize_the_same_id() {
        let locks = OpLocks::default();
        let guard = locks.acquire("a").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("a").await;
            })
        };
        // Other ids are not blocked.
        drop(locks.acquire("b").await);
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
