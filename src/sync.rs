//! Sync engine: reconciles the local store with a remote mirror and exposes
//! sync health.
//!
//! Reconciliation is whole-collection last-writer-wins: local collections are
//! pushed, then the mirror's versions are pulled and overwrite local state.
//! Field-level merge/conflict resolution is deliberately not attempted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, PortalError};
use crate::store::LocalStore;
use crate::types::{Notice, SyncStatus, VoiceFeedback};

/// Connectivity probe. Production probes the portal health endpoint; tests
/// flip a flag.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// The remote side of sync: push local collections up, pull the remote's
/// versions down.
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    async fn push_notices(&self, notices: &[Notice]) -> Result<(), PortalError>;
    async fn push_feedback(&self, feedback: &[VoiceFeedback]) -> Result<(), PortalError>;
    async fn pull_notices(&self) -> Result<Vec<Notice>, PortalError>;
    async fn pull_feedback(&self) -> Result<Vec<VoiceFeedback>, PortalError>;
}

pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    mirror: Arc<dyn RemoteMirror>,
    connectivity: Arc<dyn Connectivity>,
    status: RwLock<SyncStatus>,
    /// Mutual-exclusion gate: at most one sync in flight. `try_lock` rejects
    /// a second caller instead of interleaving.
    gate: Mutex<()>,
    auto_sync_delay: Duration,
    pending_check_interval: Duration,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        mirror: Arc<dyn RemoteMirror>,
        connectivity: Arc<dyn Connectivity>,
        auto_sync_delay: Duration,
        pending_check_interval: Duration,
    ) -> Self {
        Self {
            store,
            mirror,
            connectivity,
            status: RwLock::new(SyncStatus::default()),
            gate: Mutex::new(()),
            auto_sync_delay,
            pending_check_interval,
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Push local notices and feedback, then pull the mirror's versions and
    /// overwrite local state with them.
    ///
    /// Fails fast when offline (recording the attempt) and rejects a caller
    /// while another sync is in flight. Any failure leaves the local
    /// collections untouched and only updates the status record.
    pub async fn sync_now(&self) -> Result<(), PortalError> {
        if !self.connectivity.is_online().await {
            let mut status = self.status.write().await;
            status.last_attempt = Some(Utc::now());
            status.error = Some("Cannot sync while offline".to_string());
            return Err(PortalError::offline());
        }

        let _guard = match self.gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                return Err(PortalError::new(
                    ErrorKind::Busy,
                    "Sync already in progress",
                ))
            }
        };

        {
            let mut status = self.status.write().await;
            status.is_syncing = true;
            status.last_attempt = Some(Utc::now());
            status.error = None;
        }
        info!("Sync started");

        match self.run_sync().await {
            Ok(()) => {
                let mut status = self.status.write().await;
                status.is_syncing = false;
                status.last_success = Some(Utc::now());
                status.pending_changes = 0;
                status.error = None;
                info!("Sync completed");
                Ok(())
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.is_syncing = false;
                status.error = Some(e.user_message());
                warn!(error = %e, "Sync failed");
                Err(e)
            }
        }
    }

    async fn run_sync(&self) -> Result<(), PortalError> {
        let local_notices = self.store.load_notices().await?;
        let local_feedback = self.store.load_feedback().await?;

        self.mirror.push_notices(&local_notices).await?;
        self.mirror.push_feedback(&local_feedback).await?;

        let remote_notices = self.mirror.pull_notices().await?;
        let remote_feedback = self.mirror.pull_feedback().await?;

        // Whole-collection overwrite: the pulled state wins.
        self.store.save_notices(&remote_notices).await?;
        self.store.save_feedback(&remote_feedback).await?;
        Ok(())
    }

    /// Recount items created after the last successful sync (all items if no
    /// sync has ever succeeded). Idempotent: calling twice without
    /// intervening writes yields the same count.
    pub async fn recompute_pending(&self) -> Result<usize, PortalError> {
        let notices = self.store.load_notices().await?;
        let feedback = self.store.load_feedback().await?;

        let last_success = self.status.read().await.last_success;
        let pending = match last_success {
            Some(cutoff) => {
                notices.iter().filter(|n| n.created_at > cutoff).count()
                    + feedback.iter().filter(|f| f.created_at > cutoff).count()
            }
            None => notices.len() + feedback.len(),
        };

        let mut status = self.status.write().await;
        status.pending_changes = pending;
        debug!(pending, "Recomputed pending changes");
        Ok(pending)
    }

    /// Spawn the engine's background tasks:
    /// - auto-sync a fixed delay after connectivity transitions to online;
    /// - periodic pending-count recompute, regardless of connectivity.
    pub fn spawn_tasks(self: &Arc<Self>, online_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let engine = Arc::clone(self);
        let mut rx = online_rx;
        handles.push(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if !online {
                    continue;
                }
                // Let a flaky reconnect settle before syncing.
                tokio::time::sleep(engine.auto_sync_delay).await;
                if let Err(e) = engine.sync_now().await {
                    if !e.is_retryable() {
                        warn!(error = %e, "Auto-sync after reconnect failed");
                        continue;
                    }
                    // One more attempt: the first sync after a reconnect can
                    // race a link that is still flapping.
                    tokio::time::sleep(engine.auto_sync_delay).await;
                    if let Err(e) = engine.sync_now().await {
                        warn!(error = %e, "Auto-sync retry failed");
                    }
                }
            }
        }));

        let engine = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.pending_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so spawn time isn't a tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = engine.recompute_pending().await {
                    warn!(error = %e, "Pending-change recompute failed");
                }
            }
        }));

        handles
    }
}
