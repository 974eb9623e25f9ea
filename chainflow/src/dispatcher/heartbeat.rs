//! Lease heartbeat for the step being executed.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::Timestamp;
use crate::store::StateStore;

/// Lease timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// How long a claim stays valid without a heartbeat.
    pub lease: Duration,
    /// How often the lease is refreshed while the adapter runs.
    pub heartbeat_interval: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Returns `now + lease`, saturating at the largest representable time.
pub(crate) fn lease_deadline(now: Timestamp, lease: Duration) -> Timestamp {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Aborts the heartbeat task when dropped.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawns a task refreshing the lease of `step_id` every interval.
    pub(crate) fn spawn(store: Arc<dyn StateStore>, step_id: Uuid, settings: DispatcherSettings) -> Self {
        let period = settings.heartbeat_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the claim already set a lease.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let until = lease_deadline(Utc::now(), settings.lease);
                match store.heartbeat(step_id, until).await {
                    Ok(()) => debug!(%step_id, lease_until = %until, "Lease refreshed"),
                    Err(e) => {
                        warn!(%step_id, error = %e, "Heartbeat failed, stopping");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
