//! NoteSync Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Pushing local edits through the operation queue
//! - Periodic remote polling with backoff
//! - Forwarding engine events to the log
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon opens the sync engine, starts its background tasks and then
//! waits for a shutdown signal. Every task shares one `CancellationToken`
//! that is triggered on receipt of SIGTERM or SIGINT.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use notesync_core::{
    config::Config,
    ports::{ILocalStore, IRemoteStore, SyncEvent},
};
use notesync_remote::{DirectoryRemoteStore, MemoryRemoteStore};
use notesync_store::JsonFileStore;
use notesync_sync::{BroadcastNotifier, SyncEngine};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Overrides the configuration file location
const CONFIG_ENV: &str = "NOTESYNC_CONFIG";

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the sync engine and the shutdown token for the daemon's lifetime
struct DaemonService {
    engine: SyncEngine,
    notifier: BroadcastNotifier,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the local data directory, the remote store and the engine.
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let local: Arc<dyn ILocalStore> = Arc::new(
            JsonFileStore::open(&config.sync.data_dir)
                .await
                .context("Failed to open data directory")?,
        );
        let remote = open_remote(&config).await?;
        let notifier = BroadcastNotifier::new();

        let engine = SyncEngine::open(config, local, remote, Arc::new(notifier.clone()))
            .await
            .context("Failed to open sync engine")?;

        Ok(Self {
            engine,
            notifier,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    ///
    /// 1. Starts the event log task
    /// 2. Starts the engine's poller and drain watcher
    /// 3. Requests an initial sync
    /// 4. Waits for shutdown, then drains the queue and persists state
    async fn run(&self) -> Result<()> {
        let events = tokio::spawn(log_events(
            self.notifier.subscribe(),
            self.shutdown.clone(),
        ));

        let mut tasks = self.engine.start(self.shutdown.clone());
        tasks.push(events);

        if !self.engine.request_sync() {
            debug!("Initial sync already requested");
        }

        info!("NoteSync daemon running");
        self.shutdown.cancelled().await;
        info!("Shutdown requested, stopping background tasks");

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let status = self.engine.status();
        if status.pending_operations > 0 || status.dirty {
            info!(
                pending = status.pending_operations,
                dirty = status.dirty,
                "Unsynced changes remain and will be pushed on next start"
            );
        }

        self.engine
            .shutdown()
            .await
            .context("Failed to persist sync state")?;
        Ok(())
    }
}

async fn open_remote(config: &Config) -> Result<Arc<dyn IRemoteStore>> {
    match config.remote.backend.as_str() {
        "memory" => {
            warn!("Memory remote backend selected, nothing leaves this process");
            Ok(Arc::new(MemoryRemoteStore::new()))
        }
        _ => {
            let store = DirectoryRemoteStore::open(&config.remote.path)
                .await
                .with_context(|| {
                    format!("Failed to open remote directory {}", config.remote.path.display())
                })?;
            Ok(Arc::new(store))
        }
    }
}

/// Writes engine events to the log until shutdown
async fn log_events(mut rx: broadcast::Receiver<SyncEvent>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = rx.recv() => event,
        };
        match event {
            Ok(SyncEvent::Status { status }) => info!(%status, "Sync status changed"),
            Ok(SyncEvent::NotesChanged { note_ids }) => {
                info!(count = note_ids.len(), "Notes updated by sync");
                debug!(
                    notes = %serde_json::to_string(&note_ids).unwrap_or_default(),
                    "Changed note ids"
                );
            }
            Ok(SyncEvent::Message { notification }) => info!(
                category = %notification.category,
                priority = %notification.priority,
                title = %notification.title,
                "{}",
                notification.body
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => return,
        }
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

fn init_tracing(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = Config::load_or_default(&path);
    init_tracing(&config);

    info!(config_path = %path.display(), "NoteSync daemon starting (notesyncd)");
    for problem in config.validate() {
        warn!(field = %problem.field, "{}", problem.message);
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("NoteSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "NoteSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
