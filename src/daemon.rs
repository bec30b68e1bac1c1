//! Service wiring: construct the store, services and sync engine from
//! config, spawn the background tasks and run the HTTP server.
//!
//! Everything is explicitly constructed here and handed down; no module
//! holds process-wide mutable state of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::assistant::{ChatService, GoogleGenAiGenerator};
use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::notices::{DataUriQrGenerator, DataUriSynthesizer, NoticeRegistry};
use crate::remote::{HttpConnectivity, PortalClient};
use crate::server::{self, ServerState};
use crate::store::{LocalStore, SqliteLocalStore};
use crate::sync::{Connectivity, SyncEngine};
use crate::types::UserRole;

const CONNECTIVITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECTIVITY_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(
        SqliteLocalStore::new(&config.store.db_path, config.store.capacity_bytes).await?,
    );
    info!(db = %config.store.db_path, "Local store opened");

    let generator = Arc::new(GoogleGenAiGenerator::new(&config.assistant)?);
    if config.assistant.api_key.is_empty() {
        warn!("No GenAI API key configured; the assistant will answer with fallback replies");
    }
    let chat = Arc::new(ChatService::new(store.pool().clone(), generator).await?);
    let auth = Arc::new(
        AuthService::new(
            store.pool().clone(),
            &config.server.token_secret,
            config.server.token_ttl_secs,
        )
        .await?,
    );

    if !config.server.admin_email.is_empty() {
        match auth
            .set_role_by_email(&config.server.admin_email, UserRole::Admin)
            .await
        {
            Ok(()) => info!(email = %config.server.admin_email, "Admin account promoted"),
            Err(e) => warn!(email = %config.server.admin_email, error = %e,
                "Admin promotion skipped (account not registered yet)"),
        }
    }

    let registry = Arc::new(NoticeRegistry::new(
        store.clone() as Arc<dyn LocalStore>,
        Arc::new(DataUriQrGenerator),
        Arc::new(DataUriSynthesizer),
    ));
    registry.refresh().await?;

    let mirror = Arc::new(PortalClient::new(
        &config.sync.remote_base_url,
        Duration::from_secs(config.sync.request_timeout_secs),
    )?);
    let connectivity: Arc<dyn Connectivity> = Arc::new(HttpConnectivity::new(
        &config.sync.remote_base_url,
        CONNECTIVITY_PROBE_TIMEOUT,
    )?);

    let engine = Arc::new(SyncEngine::new(
        store.clone() as Arc<dyn LocalStore>,
        mirror,
        connectivity.clone(),
        Duration::from_secs(config.sync.auto_sync_delay_secs),
        Duration::from_secs(config.sync.pending_check_interval_secs),
    ));

    let (online_tx, online_rx) = watch::channel(connectivity.is_online().await);
    engine.spawn_tasks(online_rx);
    spawn_connectivity_poller(connectivity, online_tx);

    let state = ServerState {
        auth,
        chat,
        store: store as Arc<dyn LocalStore>,
        registry,
    };
    server::serve(state, &config.server.bind).await
}

/// Poll the connectivity probe and publish transitions; the sync engine
/// reacts to the offline→online edge.
fn spawn_connectivity_poller(
    connectivity: Arc<dyn Connectivity>,
    tx: watch::Sender<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CONNECTIVITY_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let online = connectivity.is_online().await;
            let changed = tx.send_if_modified(|current| {
                if *current != online {
                    *current = online;
                    true
                } else {
                    false
                }
            });
            if changed {
                info!(online, "Connectivity changed");
            }
        }
    })
}
