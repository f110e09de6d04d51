use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use vd_store::models::VpsRecord;

use crate::notify::notify_owner;
use crate::state::AppState;

/// Spawn the background expiry loop.
pub fn spawn_reconciler(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let expired = reconcile_expired(&state, Utc::now()).await;
            if !expired.is_empty() {
                tracing::info!(count = expired.len(), ids = ?expired, "expired VPSes reaped");
            }
        }
    })
}

/// Tear down every VPS whose expiry is at or before `now` and delete its record.
///
/// Stop and remove are best-effort: a container that is already gone, or
/// that refuses to go, does not keep its record alive. Returns the ids reaped.
pub async fn reconcile_expired(state: &AppState, now: DateTime<Utc>) -> Vec<String> {
    let due: Vec<VpsRecord> = state
        .store
        .list_all()
        .await
        .into_iter()
        .filter(|r| r.is_expired(now))
        .collect();

    let mut reaped = Vec::new();
    for candidate in due {
        let id = candidate.id;
        let guard = state.locks.acquire(&id).await;

        // Re-read under the lock; only this loop deletes records.
        let Some(record) = state.store.get(&id).await else {
            drop(guard);
            state.locks.forget(&id).await;
            continue;
        };

        tracing::info!(vps_id = %id, expires_at = %record.expires_at, "VPS expired");
        teardown(state, &record).await;

        notify_owner(
            &*state.notifier,
            &record.owner,
            &id,
            &format!(
                "Your VPS {id} has reached its expiry time and has been stopped. \
                 Contact an administrator to restart it."
            ),
        )
        .await;

        match state.store.remove(&id).await {
            Ok(_) => reaped.push(id.clone()),
            // Left in place; the next tick repeats the teardown and retries.
            Err(e) => tracing::error!(vps_id = %id, error = %e, "failed to delete expired record"),
        }

        drop(guard);
        state.locks.forget(&id).await;
    }
    reaped
}

async fn teardown(state: &AppState, record: &VpsRecord) {
    let container = record.container_name.as_str();

    if record.suspended
        && let Err(e) = state.runtime.unpause(container).await
    {
        tracing::warn!(vps_id = %record.id, container, error = %e, "expiry: unpause failed");
    }
    if let Err(e) = state.runtime.stop(container).await {
        tracing::warn!(vps_id = %record.id, container, error = %e, "expiry: stop failed");
    }
    if let Err(e) = state.runtime.remove(container).await {
        tracing::warn!(vps_id = %record.id, container, error = %e, "expiry: remove failed");
    }
}
