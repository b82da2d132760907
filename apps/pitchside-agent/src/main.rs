//! # Pitchside Agent
//!
//! Headless runner for the sync layer.
//!
//! ```text
//! pitchside-agent [path/to/sync.toml]
//!
//!   load config ──► build services ──► start ──► wait for signal ──► shutdown
//! ```
//!
//! ## Log Levels
//! - `RUST_LOG=debug` shows cache and queue detail
//! - Default: `info,pitchside=debug,sqlx=warn`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pitchside_core::ReplayFailure;
use pitchside_sync::{ChangeEvent, SyncConfig, SyncEventEmitter, SyncServices, SyncStatus};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Writes sync events to the log.
struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        info!(
            state = %status.connection_state,
            last_sync = ?status.last_sync,
            pending = status.pending_offline,
            cached = status.cached_entries,
            error = ?status.last_error,
            "Sync status"
        );
    }

    fn emit_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Pushed { topic, .. } => debug!(topic, "Pushed change"),
            ChangeEvent::Reconciled(delta) => {
                debug!(entity = %delta.entity, id = %delta.entity_id, op = ?delta.op, "Reconciled change")
            }
        }
    }

    fn emit_replay_failure(&self, failure: &ReplayFailure) {
        error!(
            id = %failure.item.id,
            action = %failure.item.action,
            retries = failure.item.retry_count,
            error = %failure.error,
            "Queued action dropped"
        );
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pitchside=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = SyncConfig::load(config_path).context("Failed to load sync config")?;
    info!(
        ws = %config.connection.url,
        api = %config.api.base_url,
        backend = ?config.offline.backend,
        "Configuration loaded"
    );

    let services = SyncServices::build(config, Arc::new(LogEmitter))
        .await
        .context("Failed to build sync services")?;
    services.start().await.context("Failed to start sync")?;
    info!("Pitchside agent running");

    shutdown_signal().await;

    services.shutdown().await;
    info!("Agent shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync...");
}
