//! CLI subcommands and the helpers they share

pub mod archive;
pub mod config;
pub mod folder;
pub mod note;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use notesync_core::config::Config;
use notesync_core::domain::{FolderId, NoteId};
use notesync_core::ports::{ILocalStore, IRemoteStore, NullNotifier};
use notesync_remote::{DirectoryRemoteStore, MemoryRemoteStore};
use notesync_store::JsonFileStore;
use notesync_sync::{OpOutcome, OpTicket, SyncEngine};

use crate::output::{OutputFormat, OutputFormatter};

/// Options shared by every subcommand
#[derive(Debug, Clone)]
pub struct CliContext {
    pub format: OutputFormat,
    pub config_path: PathBuf,
}

impl CliContext {
    pub fn load_config(&self) -> Config {
        Config::load_or_default(&self.config_path)
    }
}

/// Open the local data directory and the configured remote store.
pub async fn open_engine(config: &Config) -> Result<SyncEngine> {
    let local: Arc<dyn ILocalStore> = Arc::new(
        JsonFileStore::open(&config.sync.data_dir)
            .await
            .with_context(|| format!("Failed to open data directory {}", config.sync.data_dir.display()))?,
    );
    let remote = open_remote(config).await?;
    let engine = SyncEngine::open(config.clone(), local, remote, Arc::new(NullNotifier))
        .await
        .context("Failed to open sync engine")?;
    Ok(engine)
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

/// Wait for a queued upload, then close the engine.
///
/// A failed upload is not an error for the command: the change is stored
/// locally and the next sync retries it.
pub async fn finish(
    engine: &SyncEngine,
    ticket: OpTicket,
    formatter: &dyn OutputFormatter,
) -> Result<OpOutcome> {
    engine.queue().flush().await;
    let outcome = ticket.outcome().await;
    debug!(?outcome, "Queued operation finished");
    if let OpOutcome::Failed(e) = &outcome {
        formatter.warn(&format!("Saved locally, upload failed ({e}); it will be retried on the next sync"));
    }
    engine.shutdown().await.context("Failed to shut down sync engine")?;
    Ok(outcome)
}

pub fn parse_note_id(raw: &str) -> Result<NoteId> {
    raw.parse::<NoteId>()
        .with_context(|| format!("Invalid note id '{raw}'"))
}

pub fn parse_folder_id(raw: &str) -> Result<FolderId> {
    raw.parse::<FolderId>()
        .with_context(|| format!("Invalid folder id '{raw}'"))
}

/// Note content from `--content` or `--file`, if either was given.
pub fn read_content(content: Option<&str>, file: Option<&Path>) -> Result<Option<String>> {
    match (content, file) {
        (Some(text), _) => Ok(Some(text.to_string())),
        (None, Some(path)) => read_file(path).map(Some),
        (None, None) => Ok(None),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn outcome_label(outcome: &OpOutcome) -> &'static str {
    match outcome {
        OpOutcome::Completed(_) => "uploaded",
        OpOutcome::Deleted => "deleted",
        OpOutcome::Superseded => "superseded",
        OpOutcome::Failed(_) => "pending",
    }
}
