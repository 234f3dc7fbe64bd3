//! Sync engine facade
//!
//! Wires the sync state, blob registry, operation queue, orchestrator and
//! poller together and exposes the edit operations of the host
//! application. Every local write happens under the local write gate so
//! the orchestrator never overwrites an edit it has not seen.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use notesync_core::config::Config;
use notesync_core::domain::{
    DomainError, Folder, FolderId, IndexDocument, Note, NoteId, RemoteId,
};
use notesync_core::ports::{ILocalStore, INotificationService, IRemoteStore};

use crate::executor::RemoteOpExecutor;
use crate::orchestrator::{SyncOrchestrator, SyncReport, SyncTrigger};
use crate::poller::{ChangePoller, PollerHandle};
use crate::queue::{BlobOperation, OpTicket, OperationQueue};
use crate::registry::{note_blob_name, BlobRegistry};
use crate::retry::RetryPolicy;
use crate::sync_state::SyncState;
use crate::SyncError;

/// Point-in-time view of the engine for status displays
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub dirty: bool,
    pub dirty_notes: Vec<NoteId>,
    pub deleted_notes: Vec<NoteId>,
    pub pending_operations: usize,
    pub last_synced_remote_ts: Option<DateTime<Utc>>,
    pub polling: bool,
}

pub struct SyncEngine {
    config: Config,
    local: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteStore>,
    state: Arc<SyncState>,
    registry: Arc<BlobRegistry>,
    queue: OperationQueue,
    orchestrator: Arc<SyncOrchestrator>,
    notifier: Arc<dyn INotificationService>,
    local_gate: Arc<Mutex<()>>,
    poller: StdMutex<Option<PollerHandle>>,
}

impl SyncEngine {
    /// Load the persisted sync state and build every component.
    ///
    /// Must be called from within a Tokio runtime; the queue dispatcher is
    /// spawned immediately.
    pub async fn open(
        config: Config,
        local: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteStore>,
        notifier: Arc<dyn INotificationService>,
    ) -> Result<Self, SyncError> {
        let parent = config
            .remote
            .parent_id
            .clone()
            .map(RemoteId::new)
            .transpose()?;
        let state = Arc::new(SyncState::load(local.as_ref()).await);
        let registry = Arc::new(BlobRegistry::new(
            Arc::clone(&remote),
            parent,
            RetryPolicy::metadata(&config.retry),
        ));
        let executor = Arc::new(RemoteOpExecutor::new(
            Arc::clone(&remote),
            Arc::clone(&registry),
            RetryPolicy::transfer(&config.retry),
        ));
        let queue = OperationQueue::new(executor, &config.queue);
        let local_gate = Arc::new(Mutex::new(()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            Arc::clone(&state),
            Arc::clone(&registry),
            Arc::clone(&notifier),
            Arc::clone(&local_gate),
            &config.retry,
        ));

        info!(
            dirty = state.is_dirty(),
            last_synced = ?state.last_synced_remote_ts(),
            "Sync engine opened"
        );

        Ok(Self {
            config,
            local,
            remote,
            state,
            registry,
            queue,
            orchestrator,
            notifier,
            local_gate,
            poller: StdMutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn index(&self) -> Result<IndexDocument, SyncError> {
        Ok(self.local.load_index().await?.unwrap_or_default())
    }

    pub async fn note(&self, id: &NoteId) -> Result<Option<Note>, SyncError> {
        Ok(self.local.load_note(id).await?)
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Write a note and its index entry, then queue the upload.
    #[instrument(skip(self, note), fields(note_id = %note.id))]
    pub async fn save_note(&self, mut note: Note) -> Result<OpTicket, SyncError> {
        note.rehash();
        let is_new = {
            let _gate = self.local_gate.lock().await;
            let mut index = self.index().await?;
            if let Some(folder_id) = &note.folder_id {
                if index.folder(folder_id).is_none() {
                    return Err(DomainError::UnknownFolder(folder_id.to_string()).into());
                }
            }
            let is_new = !index.contains_note(&note.id);
            self.local.save_note(&note).await?;
            index.upsert_note(note.metadata());
            self.local.save_index(&index).await?;
            self.state.mark_note_dirty(&note.id);
            is_new
        };
        self.persist_state().await?;

        let name = note_blob_name(&note.id);
        let parent = self.registry.parent().cloned();
        let bytes = note.to_json_bytes()?;
        let op = if is_new && self.state.last_synced_hash(&note.id).is_none() {
            BlobOperation::create(name, parent, bytes)
        } else {
            let remote_id = self.registry.lookup(&name);
            BlobOperation::update(name, parent, remote_id, bytes)
        };
        debug!(kind = ?op.kind, "Queueing note upload");
        Ok(self.queue.enqueue(op.with_hash(note.content_hash)).await?)
    }

    /// Remove a note locally and queue the remote delete.
    #[instrument(skip(self))]
    pub async fn delete_note(&self, id: &NoteId) -> Result<OpTicket, SyncError> {
        {
            let _gate = self.local_gate.lock().await;
            let mut index = self.index().await?;
            let listed = index.remove_note(id).is_some();
            let stored = self.local.load_note(id).await?.is_some();
            if !listed && !stored {
                return Err(SyncError::NoteNotFound(id.to_string()));
            }
            self.local.delete_note(id).await?;
            self.local.save_index(&index).await?;
            self.state.mark_note_deleted(id);
        }
        self.persist_state().await?;

        let name = note_blob_name(id);
        let remote_id = self.registry.lookup(&name);
        let op = BlobOperation::delete(name, self.registry.parent().cloned(), remote_id);
        Ok(self.queue.enqueue(op).await?)
    }

    /// Apply a structural edit (folders, order, collapse state) to the
    /// local index.
    pub async fn edit_structure<T, F>(&self, edit: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut IndexDocument) -> Result<T, DomainError>,
    {
        let value = {
            let _gate = self.local_gate.lock().await;
            let mut index = self.index().await?;
            let value = edit(&mut index)?;
            index.normalize();
            self.local.save_index(&index).await?;
            self.state.mark_dirty();
            value
        };
        self.persist_state().await?;
        Ok(value)
    }

    pub async fn create_folder(&self, name: &str) -> Result<FolderId, SyncError> {
        let folder = Folder::new(FolderId::generate(), name);
        let id = folder.id.clone();
        self.edit_structure(|index| {
            index.add_folder(folder);
            Ok(())
        })
        .await?;
        Ok(id)
    }

    // ========================================================================
    // User-initiated sync
    // ========================================================================

    /// Flush queued uploads and run a reconciliation cycle.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        self.run_user_cycle(SyncTrigger::SyncNow).await
    }

    /// Persist local state, flush queued uploads and reconcile.
    pub async fn save_now(&self) -> Result<SyncReport, SyncError> {
        self.persist_state().await?;
        self.run_user_cycle(SyncTrigger::SaveNow).await
    }

    async fn run_user_cycle(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        self.queue.flush().await;
        self.queue.wait_idle().await;
        self.orchestrator.run_cycle(trigger).await
    }

    /// Ask the background poller for a cycle. Returns false when no poller
    /// runs or a request is already waiting.
    pub fn request_sync(&self) -> bool {
        self.poller_handle()
            .is_some_and(|handle| handle.request_sync(SyncTrigger::SyncNow))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the change poller and the queue-drain watcher.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let (poller, handle) = ChangePoller::new(
            &self.config,
            Arc::clone(&self.remote),
            Arc::clone(&self.orchestrator),
            self.queue.clone(),
            Arc::clone(&self.notifier),
        );
        *self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle.clone());

        let poller_task = tokio::spawn(poller.run(shutdown.clone()));
        let drain_task = tokio::spawn(watch_drain(self.queue.subscribe_pending(), handle, shutdown));
        vec![poller_task, drain_task]
    }

    /// Drop waiting updates, drain the queue and persist the sync state.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        info!("Shutting down sync engine");
        self.queue.shutdown().await;
        self.persist_state().await
    }

    pub fn has_pending_work(&self) -> bool {
        self.queue.has_pending_work()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            dirty: self.state.is_dirty(),
            dirty_notes: self.state.dirty_note_ids(),
            deleted_notes: self.state.deleted_note_ids(),
            pending_operations: self.queue.pending_count(),
            last_synced_remote_ts: self.state.last_synced_remote_ts(),
            polling: self.poller_handle().is_some(),
        }
    }

    fn poller_handle(&self) -> Option<PollerHandle> {
        self.poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn persist_state(&self) -> Result<(), SyncError> {
        self.state.persist(self.local.as_ref()).await?;
        Ok(())
    }
}

/// Request a cycle each time the queue goes from busy to idle.
async fn watch_drain(
    mut pending: watch::Receiver<usize>,
    handle: PollerHandle,
    shutdown: CancellationToken,
) {
    let mut busy = *pending.borrow_and_update() > 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = pending.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let now_busy = *pending.borrow_and_update() > 0;
        if busy && !now_busy {
            debug!("Operation queue drained");
            handle.request_sync(SyncTrigger::QueueDrained);
        }
        busy = now_busy;
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("queue", &self.queue)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
