//! # missive-server
//!
//! Real-time direct-messaging server.
//!
//! This binary provides:
//! - **Presence tracking**: one live WebSocket connection per user, with the
//!   full online set broadcast on every change
//! - **Friend-request protocol**: at-most-once request negotiation with
//!   storage-enforced pair uniqueness
//! - **Message delivery**: write-through persistence with best-effort
//!   realtime push to connected receivers
//! - **Reconciliation queries** for reconnecting clients (friends, pending
//!   requests, conversation history, stale-id pruning)
//! - **Media storage** for image messages and avatars
//! - **REST API** (axum) plus a WebSocket realtime channel
//! - **Per-IP rate limiting** on the HTTP surface

mod api;
mod config;
mod delivery;
mod error;
mod media_store;
mod presence;
mod rate_limit;
mod reconcile;
mod requests;
mod wire;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use missive_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::delivery::DeliveryPipeline;
use crate::media_store::MediaStore;
use crate::presence::PresenceRegistry;
use crate::rate_limit::RateLimiter;
use crate::reconcile::Reconciler;
use crate::requests::RequestProtocol;

/// The storage handle shared by every service. `rusqlite` connections are not
/// `Sync`, so access is serialized behind an async mutex; this also means
/// invariant-bearing writes never interleave mid-statement.
pub type SharedDb = Arc<Mutex<Database>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,missive_server=debug")),
        )
        .init();

    info!("Starting Missive server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        db = %config.db_path.display(),
        media = %config.media_storage_path.display(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    let db: SharedDb = Arc::new(Mutex::new(Database::open_at(&config.db_path)?));

    // Media store (creates directories if missing)
    let media = Arc::new(
        MediaStore::new(config.media_storage_path.clone(), config.max_media_size).await?,
    );

    // Presence registry, constructed once and injected everywhere
    let presence = PresenceRegistry::new();

    // Rate limiter: 10 req/s sustained, burst of 30
    let rate_limiter = RateLimiter::default();

    let app_state = AppState {
        presence: presence.clone(),
        requests: Arc::new(RequestProtocol::new(db.clone(), presence.clone())),
        delivery: Arc::new(DeliveryPipeline::new(
            db.clone(),
            presence.clone(),
            media.clone(),
            config.message_key,
        )),
        reconcile: Arc::new(Reconciler::new(db.clone())),
        db,
        media,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.evict_idle(std::time::Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
