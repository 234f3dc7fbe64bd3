//! Reconciliation between the local document store and the remote store
//!
//! Every caller (poller, queue drain, sync now, save now) funnels into
//! [`SyncOrchestrator::run_cycle`], which runs under one mutual-exclusion
//! section so cycles never overlap.
//!
//! ## Path selection
//!
//! ```text
//! remote index ts changed?   locally dirty?   path
//! ─────────────────────────  ───────────────  ───────
//! no                         no               nothing
//! no                         yes              push
//! yes                        no               pull
//! yes                        yes              resolve
//! (no remote index)          -                push (everything)
//! ```
//!
//! ## Commit
//!
//! A cycle captures a [`SyncSnapshot`] first and commits through
//! [`SyncState::clear_if_unchanged`]. Local edits that race the cycle keep
//! their dirty marks and are picked up by the next cycle.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use notesync_core::config::RetryConfig;
use notesync_core::domain::{IndexDocument, Note, NoteId, NoteMetadata, RemoteId};
use notesync_core::ports::{
    BlobMetadata, ILocalStore, INotificationService, IRemoteStore, Notification, RemoteError,
    RemoteResult, SyncEvent, SyncStatus,
};

use crate::merge;
use crate::registry::{note_blob_name, BlobRegistry, UploadRecord, INDEX_BLOB};
use crate::retry::RetryPolicy;
use crate::sync_state::{SyncSnapshot, SyncState};
use crate::SyncError;

// ============================================================================
// Triggers and reports
// ============================================================================

/// What started a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// First cycle after (re)connecting
    Connect,
    /// The change feed reported relevant changes
    Poll,
    /// Periodic reconciliation regardless of the feed
    FullCheck,
    /// The operation queue finished its pending work
    QueueDrained,
    /// The user asked to sync
    SyncNow,
    /// The user asked to save
    SaveNow,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncTrigger::Connect => "connect",
            SyncTrigger::Poll => "poll",
            SyncTrigger::FullCheck => "full_check",
            SyncTrigger::QueueDrained => "queue_drained",
            SyncTrigger::SyncNow => "sync_now",
            SyncTrigger::SaveNow => "save_now",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPath {
    Nothing,
    Push,
    Pull,
    Resolve,
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPath::Nothing => "nothing",
            SyncPath::Push => "push",
            SyncPath::Pull => "pull",
            SyncPath::Resolve => "resolve",
        };
        write!(f, "{s}")
    }
}

/// Result of one reconciliation cycle
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub path: SyncPath,
    pub uploaded: u32,
    pub downloaded: u32,
    pub deleted_local: u32,
    pub deleted_remote: u32,
    /// Notes edited on both sides since the last agreement
    pub conflicts: u32,
    /// Local notes rewritten or removed by this cycle
    pub changed_note_ids: Vec<NoteId>,
    /// Per-note failures; any entry means nothing was committed
    pub errors: Vec<String>,
    /// The new agreement point was recorded
    pub committed: bool,
    /// Local edits raced the commit and stay dirty
    pub deferred: bool,
    /// The remote index was unreadable and the cached copy was used
    pub healed_index: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    fn new(trigger: SyncTrigger, path: SyncPath) -> Self {
        Self {
            trigger,
            path,
            uploaded: 0,
            downloaded: 0,
            deleted_local: 0,
            deleted_remote: 0,
            conflicts: 0,
            changed_note_ids: Vec::new(),
            errors: Vec::new(),
            committed: false,
            deferred: false,
            healed_index: false,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.uploaded + self.downloaded + self.deleted_local + self.deleted_remote + self.conflicts
            > 0
    }

    /// Compact summary like `↑3 ↓1 ⚠1`
    pub fn summary(&self) -> String {
        let up = self.uploaded + self.deleted_remote;
        let down = self.downloaded + self.deleted_local;
        let mut parts = Vec::new();
        if up > 0 {
            parts.push(format!("↑{up}"));
        }
        if down > 0 {
            parts.push(format!("↓{down}"));
        }
        if self.conflicts > 0 {
            parts.push(format!("⚠{}", self.conflicts));
        }
        if parts.is_empty() {
            "up to date".to_string()
        } else {
            parts.join(" ")
        }
    }

    fn record_change(&mut self, id: &NoteId) {
        if !self.changed_note_ids.contains(id) {
            self.changed_note_ids.push(id.clone());
        }
    }
}

// ============================================================================
// Internal types
// ============================================================================

struct RemoteIndex {
    meta: BlobMetadata,
    doc: IndexDocument,
    healed: bool,
}

/// Marks applied after the commit so they survive it
#[derive(Default)]
struct PostCommit {
    keep_dirty: Vec<NoteId>,
    structure: bool,
}

/// Which side of a dirty note survives
enum Side {
    /// Both sides already hold the same content
    Agreed,
    Local { conflict: bool },
    Remote,
}

/// What to do with a remote note that has no local edit
enum RemotePlan {
    Unchanged,
    Download,
    /// Local copy without agreement point is newer
    KeepLocal(Note),
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

pub struct SyncOrchestrator {
    local: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteStore>,
    state: Arc<SyncState>,
    registry: Arc<BlobRegistry>,
    notifier: Arc<dyn INotificationService>,
    /// Shared with the engine's edit methods
    local_gate: Arc<Mutex<()>>,
    cycle_lock: Mutex<()>,
    /// Last Synced/Offline status, restored after a cycle fails
    settled: std::sync::Mutex<SyncStatus>,
    transfer: RetryPolicy,
    metadata: RetryPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        local: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteStore>,
        state: Arc<SyncState>,
        registry: Arc<BlobRegistry>,
        notifier: Arc<dyn INotificationService>,
        local_gate: Arc<Mutex<()>>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            local,
            remote,
            state,
            registry,
            notifier,
            local_gate,
            cycle_lock: Mutex::new(()),
            settled: std::sync::Mutex::new(SyncStatus::Offline),
            transfer: RetryPolicy::transfer(retry),
            metadata: RetryPolicy::metadata(retry),
        }
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<BlobRegistry> {
        &self.registry
    }

    /// Publish a connection status. `Synced` and `Offline` are remembered
    /// as the status to fall back to when a later cycle fails.
    pub fn publish_status(&self, status: SyncStatus) {
        if matches!(status, SyncStatus::Synced | SyncStatus::Offline) {
            *self.settled.lock().unwrap_or_else(|p| p.into_inner()) = status;
        }
        self.notifier.publish(SyncEvent::status(status));
    }

    /// Last status published as `Synced` or `Offline`
    pub fn settled_status(&self) -> SyncStatus {
        *self.settled.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run one reconciliation cycle and publish its outcome.
    #[instrument(skip_all, fields(trigger = %trigger))]
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();
        self.publish_status(SyncStatus::Syncing);

        let mut result = self.reconcile(trigger).await;
        match &mut result {
            Ok(report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    path = %report.path,
                    uploaded = report.uploaded,
                    downloaded = report.downloaded,
                    deleted_local = report.deleted_local,
                    deleted_remote = report.deleted_remote,
                    conflicts = report.conflicts,
                    errors = report.errors.len(),
                    committed = report.committed,
                    duration_ms = report.duration_ms,
                    "Sync cycle completed"
                );
                self.publish_report(report);
            }
            Err(e) => {
                warn!(error = %e, "Sync cycle failed");
                let status = if e.is_disconnected() {
                    SyncStatus::Offline
                } else {
                    self.settled_status()
                };
                self.publish_status(status);
                self.notifier
                    .publish(SyncEvent::message(Notification::error("Sync failed", e.user_message())));
            }
        }
        result
    }

    fn publish_report(&self, report: &SyncReport) {
        self.publish_status(SyncStatus::Synced);
        if !report.changed_note_ids.is_empty() {
            self.notifier.publish(SyncEvent::NotesChanged {
                note_ids: report.changed_note_ids.clone(),
            });
        }
        if report.has_changes() {
            self.notifier
                .publish(SyncEvent::message(Notification::sync("Notes synced", report.summary())));
        }
        if report.conflicts > 0 {
            self.notifier.publish(SyncEvent::message(Notification::conflict(
                "Notes edited on several devices",
                format!(
                    "{} note(s) changed in more than one place; the most recent version was kept.",
                    report.conflicts
                ),
            )));
        }
        if !report.errors.is_empty() {
            self.notifier.publish(SyncEvent::message(Notification::error(
                "Some notes did not sync",
                format!(
                    "{} note(s) could not be synced and will be retried.",
                    report.errors.len()
                ),
            )));
        }
    }

    async fn reconcile(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let snapshot = self.state.snapshot();
        let index_meta = self.fetch_index_meta().await?;

        let path = match &index_meta {
            None => SyncPath::Push,
            Some(meta) => {
                let remote_changed = self.state.remote_changed_since(meta.modified);
                match (remote_changed, snapshot.has_local_changes()) {
                    (false, false) => SyncPath::Nothing,
                    (false, true) => SyncPath::Push,
                    (true, false) => SyncPath::Pull,
                    (true, true) => SyncPath::Resolve,
                }
            }
        };
        debug!(
            path = %path,
            revision = snapshot.revision,
            dirty = snapshot.dirty_note_ids.len(),
            deleted = snapshot.deleted_note_ids.len(),
            remote_index = index_meta.is_some(),
            "Selected sync path"
        );

        match (path, index_meta) {
            (SyncPath::Nothing, _) => {
                let mut report = SyncReport::new(trigger, SyncPath::Nothing);
                report.committed = true;
                Ok(report)
            }
            (SyncPath::Push, meta) => self.push(trigger, &snapshot, meta.as_ref()).await,
            (SyncPath::Pull, Some(meta)) => {
                let remote = self.download_index(meta).await?;
                self.pull(trigger, &snapshot, remote).await
            }
            (SyncPath::Resolve, Some(meta)) => {
                let remote = self.download_index(meta).await?;
                self.resolve(trigger, &snapshot, remote).await
            }
            (_, None) => self.push(trigger, &snapshot, None).await,
        }
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Upload local changes and replace the remote index with the local one.
    #[instrument(skip_all, fields(full = index_meta.is_none()))]
    async fn push(
        &self,
        trigger: SyncTrigger,
        snapshot: &SyncSnapshot,
        index_meta: Option<&BlobMetadata>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(trigger, SyncPath::Push);
        let push_all = index_meta.is_none();

        let (local_index, notes) = {
            let _gate = self.local_gate.lock().await;
            let index = self.load_local_index().await?;
            let ids: Vec<NoteId> = if push_all {
                index.note_ids().cloned().collect()
            } else {
                snapshot.dirty_note_ids.clone()
            };
            let mut notes = Vec::with_capacity(ids.len());
            for id in ids {
                match self.local.load_note(&id).await {
                    Ok(Some(note)) => notes.push(note),
                    Ok(None) => debug!(note_id = %id, "Dirty note no longer exists locally"),
                    Err(e) => self.note_failure(&mut report, &id, "read", e.into())?,
                }
            }
            (index, notes)
        };

        for note in &notes {
            match self.upload_note(note).await {
                Ok(true) => report.uploaded += 1,
                Ok(false) => {}
                Err(e) => self.note_failure(&mut report, &note.id, "upload", e)?,
            }
        }
        for id in &snapshot.deleted_note_ids {
            match self.delete_remote_note(id).await {
                Ok(true) => report.deleted_remote += 1,
                Ok(false) => {}
                Err(e) => self.note_failure(&mut report, id, "delete", e)?,
            }
        }

        if !report.errors.is_empty() {
            warn!(failed = report.errors.len(), "Push incomplete, keeping local changes");
            return Ok(report);
        }

        let meta = self
            .upload_index(&local_index, index_meta.map(|m| &m.id))
            .await?;
        self.commit(
            &mut report,
            snapshot,
            meta.modified,
            &local_index,
            PostCommit::default(),
        )
        .await;
        Ok(report)
    }

    /// Bring the local side to the remote state.
    #[instrument(skip_all, fields(remote_ts = %remote.meta.modified))]
    async fn pull(
        &self,
        trigger: SyncTrigger,
        snapshot: &SyncSnapshot,
        remote: RemoteIndex,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(trigger, SyncPath::Pull);
        report.healed_index = remote.healed;
        let local_index = self.load_local_index().await?;
        let mut kept: Vec<NoteMetadata> = Vec::new();
        let mut fetched: Vec<NoteMetadata> = Vec::new();

        for meta in &remote.doc.notes {
            let outcome = match self.plan_remote_note(snapshot, meta).await {
                Ok(RemotePlan::Unchanged) => Ok(()),
                Ok(RemotePlan::Download) => self
                    .download_and_store(&meta.id, snapshot, &mut report)
                    .await
                    .map(|stored| fetched.extend(stored)),
                Ok(RemotePlan::KeepLocal(note)) => {
                    debug!(note_id = %note.id, "Keeping newer local copy without agreement point");
                    kept.push(note.metadata());
                    Ok(())
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.note_failure(&mut report, &meta.id, "download", e)?;
            }
        }

        for id in self.local_note_ids(&local_index).await? {
            if remote.doc.contains_note(&id) {
                continue;
            }
            if snapshot.last_synced_hash(&id).is_none() {
                match local_index.note(&id) {
                    Some(meta) => kept.push(meta.clone()),
                    None => match self.local.load_note(&id).await {
                        Ok(Some(note)) => kept.push(note.metadata()),
                        Ok(None) => {}
                        Err(e) => self.note_failure(&mut report, &id, "read", e.into())?,
                    },
                }
                continue;
            }
            match self.delete_local_note(&id, snapshot).await {
                Ok(true) => {
                    report.deleted_local += 1;
                    report.record_change(&id);
                }
                Ok(false) => {}
                Err(e) => self.note_failure(&mut report, &id, "remove", e)?,
            }
        }

        if !report.errors.is_empty() {
            warn!(failed = report.errors.len(), "Pull incomplete, will retry");
            return Ok(report);
        }

        // A note blob can be newer than its index record; the local list
        // follows the note actually stored.
        let mut index = remote.doc.clone();
        for meta in &fetched {
            merge::apply_local_record(&mut index, &remote.doc, meta);
        }
        for meta in &kept {
            merge::apply_local_record(&mut index, &local_index, meta);
        }
        self.write_local_index(index, snapshot).await?;

        let post = PostCommit {
            keep_dirty: kept.iter().map(|m| m.id.clone()).collect(),
            structure: remote.healed,
        };
        self.commit(&mut report, snapshot, remote.meta.modified, &remote.doc, post)
            .await;
        Ok(report)
    }

    /// Merge concurrent local and remote changes.
    #[instrument(skip_all, fields(remote_ts = %remote.meta.modified))]
    async fn resolve(
        &self,
        trigger: SyncTrigger,
        snapshot: &SyncSnapshot,
        remote: RemoteIndex,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(trigger, SyncPath::Resolve);
        report.healed_index = remote.healed;
        let local_index = self.load_local_index().await?;
        let mut merged = remote.doc.clone();
        let mut local_records: Vec<NoteMetadata> = Vec::new();

        // Local edits
        for id in &snapshot.dirty_note_ids {
            let note = match self.local.load_note(id).await {
                Ok(Some(note)) => note,
                Ok(None) => continue,
                Err(e) => {
                    self.note_failure(&mut report, id, "read", e.into())?;
                    continue;
                }
            };
            let outcome = match self.decide(snapshot, &note, remote.doc.note(id)).await {
                Ok(Side::Agreed) => Ok(()),
                Ok(Side::Local { conflict }) => {
                    if conflict {
                        info!(note_id = %id, "Both sides changed, local copy is newer");
                        report.conflicts += 1;
                    }
                    self.upload_note(&note).await.map(|sent| {
                        if sent {
                            report.uploaded += 1;
                        }
                        local_records.push(note.metadata());
                    })
                }
                Ok(Side::Remote) => {
                    info!(note_id = %id, "Both sides changed, remote copy is newer");
                    report.conflicts += 1;
                    self.download_and_store(id, snapshot, &mut report)
                        .await
                        .map(|stored| local_records.extend(stored))
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.note_failure(&mut report, id, "resolve", e)?;
            }
        }

        // Local deletions win over remote edits
        for id in &snapshot.deleted_note_ids {
            match self.delete_remote_note(id).await {
                Ok(true) => report.deleted_remote += 1,
                Ok(false) => {}
                Err(e) => self.note_failure(&mut report, id, "delete", e)?,
            }
            merged.remove_note(id);
        }

        // Remote changes to notes without local edits
        for meta in &remote.doc.notes {
            if snapshot.is_dirty_note(&meta.id) || snapshot.is_deleted_note(&meta.id) {
                continue;
            }
            let outcome = match self.plan_remote_note(snapshot, meta).await {
                Ok(RemotePlan::Unchanged) => Ok(()),
                Ok(RemotePlan::Download) => self
                    .download_and_store(&meta.id, snapshot, &mut report)
                    .await
                    .map(|stored| local_records.extend(stored)),
                Ok(RemotePlan::KeepLocal(note)) => {
                    report.conflicts += 1;
                    self.upload_note(&note).await.map(|sent| {
                        if sent {
                            report.uploaded += 1;
                        }
                        local_records.push(note.metadata());
                    })
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.note_failure(&mut report, &meta.id, "download", e)?;
            }
        }

        // Local notes the remote side does not know
        for id in self.local_note_ids(&local_index).await? {
            if remote.doc.contains_note(&id)
                || snapshot.is_dirty_note(&id)
                || snapshot.is_deleted_note(&id)
            {
                continue;
            }
            if snapshot.last_synced_hash(&id).is_some() {
                match self.delete_local_note(&id, snapshot).await {
                    Ok(true) => {
                        report.deleted_local += 1;
                        report.record_change(&id);
                    }
                    Ok(false) => {}
                    Err(e) => self.note_failure(&mut report, &id, "remove", e)?,
                }
                continue;
            }
            let outcome = match self.local.load_note(&id).await {
                Ok(Some(note)) => self.upload_note(&note).await.map(|sent| {
                    if sent {
                        report.uploaded += 1;
                    }
                    local_records.push(note.metadata());
                }),
                Ok(None) => Ok(()),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = outcome {
                self.note_failure(&mut report, &id, "upload", e)?;
            }
        }

        if !report.errors.is_empty() {
            warn!(failed = report.errors.len(), "Resolve incomplete, keeping local changes");
            return Ok(report);
        }

        for meta in &local_records {
            merge::apply_local_record(&mut merged, &local_index, meta);
        }
        merged.normalize();

        let meta = self.upload_index(&merged, Some(&remote.meta.id)).await?;
        self.write_local_index(merged.clone(), snapshot).await?;
        self.commit(&mut report, snapshot, meta.modified, &merged, PostCommit::default())
            .await;
        Ok(report)
    }

    /// Decide which side of a locally edited note survives.
    async fn decide(
        &self,
        snapshot: &SyncSnapshot,
        note: &Note,
        remote: Option<&NoteMetadata>,
    ) -> Result<Side, SyncError> {
        let Some(remote) = remote else {
            return Ok(Side::Local { conflict: false });
        };
        if remote.content_hash == note.content_hash {
            return Ok(Side::Agreed);
        }
        if snapshot.last_synced_hash(&note.id) == Some(&remote.content_hash) {
            return Ok(Side::Local { conflict: false });
        }
        match self.remote_modified(&note.id).await? {
            Some(remote_ts) if remote_ts >= note.modified => Ok(Side::Remote),
            _ => Ok(Side::Local { conflict: true }),
        }
    }

    async fn plan_remote_note(
        &self,
        snapshot: &SyncSnapshot,
        meta: &NoteMetadata,
    ) -> Result<RemotePlan, SyncError> {
        let Some(local) = self.local.load_note(&meta.id).await? else {
            return Ok(RemotePlan::Download);
        };
        if local.content_hash == meta.content_hash {
            return Ok(RemotePlan::Unchanged);
        }
        if snapshot.last_synced_hash(&meta.id).is_none() {
            let remote_ts = self.remote_modified(&meta.id).await?;
            if remote_ts.map_or(true, |ts| local.modified > ts) {
                return Ok(RemotePlan::KeepLocal(local));
            }
        }
        Ok(RemotePlan::Download)
    }

    async fn commit(
        &self,
        report: &mut SyncReport,
        snapshot: &SyncSnapshot,
        remote_ts: DateTime<Utc>,
        agreed: &IndexDocument,
        post: PostCommit,
    ) {
        let committed = self
            .state
            .clear_if_unchanged(snapshot.revision, remote_ts, agreed.hashes());
        report.committed = committed;
        report.deferred = !committed;
        for id in &post.keep_dirty {
            self.state.mark_note_dirty(id);
        }
        if post.structure {
            self.state.mark_dirty();
        }
        if let Err(e) = self.state.persist(self.local.as_ref()).await {
            warn!(error = %e, "Failed to persist sync state");
        }
    }

    fn note_failure(
        &self,
        report: &mut SyncReport,
        id: &NoteId,
        action: &str,
        err: SyncError,
    ) -> Result<(), SyncError> {
        if err.is_disconnected() {
            return Err(err);
        }
        warn!(note_id = %id, action, error = %err, "Skipping note");
        report.errors.push(format!("{action} {id}: {err}"));
        Ok(())
    }

    // ========================================================================
    // Remote helpers
    // ========================================================================

    async fn fetch_index_meta(&self) -> Result<Option<BlobMetadata>, SyncError> {
        let remote = Arc::clone(&self.remote);
        self.on_blob(INDEX_BLOB, self.metadata, "get_metadata", move |id| {
            let remote = Arc::clone(&remote);
            async move { remote.get_metadata(&id).await }
        })
        .await
    }

    async fn download_index(&self, meta: BlobMetadata) -> Result<RemoteIndex, SyncError> {
        let bytes = self
            .transfer
            .run("download_blob", || self.remote.download_blob(&meta.id))
            .await?;
        match IndexDocument::from_json_bytes(&bytes) {
            Ok(mut doc) => {
                doc.normalize();
                if let Err(e) = self.local.save_cached_remote_index(&doc).await {
                    warn!(error = %e, "Failed to cache remote index");
                }
                Ok(RemoteIndex {
                    meta,
                    doc,
                    healed: false,
                })
            }
            Err(parse_err) => {
                warn!(error = %parse_err, "Remote index is corrupt, using cached copy");
                match self.local.load_cached_remote_index().await {
                    Ok(Some(doc)) => Ok(RemoteIndex {
                        meta,
                        doc,
                        healed: true,
                    }),
                    Ok(None) => Err(SyncError::Corrupt(parse_err.to_string())),
                    Err(e) => Err(SyncError::Corrupt(format!(
                        "{parse_err}; cached copy unreadable: {e:#}"
                    ))),
                }
            }
        }
    }

    async fn upload_index(
        &self,
        index: &IndexDocument,
        known: Option<&RemoteId>,
    ) -> Result<BlobMetadata, SyncError> {
        let bytes = index.to_json_bytes()?;
        let meta = match known {
            Some(id) => match self
                .transfer
                .run("update_blob", || self.remote.update_blob(id, bytes.clone()))
                .await
            {
                Err(e) if e.is_not_found() => {
                    self.registry.forget(INDEX_BLOB);
                    self.create_blob(INDEX_BLOB, bytes).await?
                }
                other => other?,
            },
            None => self.create_blob(INDEX_BLOB, bytes).await?,
        };
        self.registry.remember(INDEX_BLOB, meta.id.clone());
        if let Err(e) = self.local.save_cached_remote_index(index).await {
            warn!(error = %e, "Failed to cache remote index");
        }
        info!(notes = index.notes.len(), modified = %meta.modified, "Published note index");
        Ok(meta)
    }

    async fn create_blob(&self, name: &str, bytes: Vec<u8>) -> RemoteResult<BlobMetadata> {
        let parent = self.registry.parent();
        self.transfer
            .run("create_blob", || self.remote.create_blob(name, parent, bytes.clone()))
            .await
    }

    /// Upload a note unless this device already uploaded the same content
    /// and the blob is unchanged since. Returns whether bytes were sent.
    async fn upload_note(&self, note: &Note) -> Result<bool, SyncError> {
        let name = note_blob_name(&note.id);
        let _guard = self.registry.lock_blob(&name).await;

        if let Some(record) = self.registry.last_upload(&note.id) {
            if record.hash == note.content_hash {
                match self
                    .metadata
                    .run("get_metadata", || self.remote.get_metadata(&record.remote_id))
                    .await
                {
                    Ok(meta) if meta.modified == record.modified => {
                        debug!(note_id = %note.id, "Note already uploaded");
                        return Ok(false);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => self.registry.forget(&name),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let bytes = note.to_json_bytes()?;
        let meta = match self.registry.resolve(&name).await? {
            Some(id) => match self
                .transfer
                .run("update_blob", || self.remote.update_blob(&id, bytes.clone()))
                .await
            {
                Err(e) if e.is_not_found() => {
                    self.registry.forget(&name);
                    self.create_blob(&name, bytes).await?
                }
                other => other?,
            },
            None => self.create_blob(&name, bytes).await?,
        };

        self.registry.remember(&name, meta.id.clone());
        self.registry.record_upload(
            &note.id,
            UploadRecord {
                remote_id: meta.id.clone(),
                hash: note.content_hash.clone(),
                modified: meta.modified,
            },
        );
        debug!(note_id = %note.id, "Uploaded note");
        Ok(true)
    }

    /// Returns whether a blob was actually deleted.
    async fn delete_remote_note(&self, id: &NoteId) -> Result<bool, SyncError> {
        let name = note_blob_name(id);
        let _guard = self.registry.lock_blob(&name).await;
        let remote = Arc::clone(&self.remote);
        let deleted = self
            .on_blob(&name, self.transfer, "delete_blob", move |rid| {
                let remote = Arc::clone(&remote);
                async move { remote.delete_blob(&rid).await }
            })
            .await?
            .is_some();
        self.registry.forget(&name);
        if deleted {
            debug!(note_id = %id, "Deleted remote note");
        }
        Ok(deleted)
    }

    async fn download_note(&self, id: &NoteId) -> Result<Note, SyncError> {
        let name = note_blob_name(id);
        let remote = Arc::clone(&self.remote);
        let bytes = self
            .on_blob(&name, self.transfer, "download_blob", move |rid| {
                let remote = Arc::clone(&remote);
                async move { remote.download_blob(&rid).await }
            })
            .await?
            .ok_or_else(|| SyncError::Remote(RemoteError::NotFound(name.clone())))?;
        let note = Note::from_json_bytes(&bytes)
            .map_err(|e| SyncError::Corrupt(format!("{name}: {e}")))?;
        if &note.id != id {
            return Err(SyncError::Corrupt(format!(
                "{name} holds note {}",
                note.id
            )));
        }
        if !note.hash_is_current() {
            warn!(note_id = %id, "Downloaded note carries a stale hash");
        }
        Ok(note)
    }

    /// Store-reported modification time of a note blob
    async fn remote_modified(&self, id: &NoteId) -> Result<Option<DateTime<Utc>>, SyncError> {
        let remote = Arc::clone(&self.remote);
        let meta = self
            .on_blob(&note_blob_name(id), self.metadata, "get_metadata", move |rid| {
                let remote = Arc::clone(&remote);
                async move { remote.get_metadata(&rid).await }
            })
            .await?;
        Ok(meta.map(|m| m.modified))
    }

    /// Run `f` against the blob named `name`, refreshing a stale cached id
    /// once. `None` when the blob does not exist.
    async fn on_blob<T, F, Fut>(
        &self,
        name: &str,
        policy: RetryPolicy,
        operation: &str,
        f: F,
    ) -> Result<Option<T>, SyncError>
    where
        F: Fn(RemoteId) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        for _ in 0..2 {
            let Some(id) = self.registry.resolve(name).await? else {
                return Ok(None);
            };
            match policy.run(operation, || f(id.clone())).await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_not_found() => {
                    debug!(name, "Cached blob id is stale");
                    self.registry.forget(name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Local helpers
    // ========================================================================

    async fn load_local_index(&self) -> Result<IndexDocument, SyncError> {
        Ok(self.local.load_index().await?.unwrap_or_default())
    }

    async fn local_note_ids(&self, index: &IndexDocument) -> Result<BTreeSet<NoteId>, SyncError> {
        let mut ids: BTreeSet<NoteId> = index.note_ids().cloned().collect();
        ids.extend(self.local.list_note_ids().await?);
        Ok(ids)
    }

    async fn download_and_store(
        &self,
        id: &NoteId,
        snapshot: &SyncSnapshot,
        report: &mut SyncReport,
    ) -> Result<Option<NoteMetadata>, SyncError> {
        let note = self.download_note(id).await?;
        let _gate = self.local_gate.lock().await;
        if self.state.marked_since(id, snapshot.revision) {
            debug!(note_id = %id, "Note edited during sync, keeping local copy");
            return Ok(None);
        }
        self.local.save_note(&note).await?;
        report.downloaded += 1;
        report.record_change(id);
        Ok(Some(note.metadata()))
    }

    /// Returns whether the note was removed.
    async fn delete_local_note(&self, id: &NoteId, snapshot: &SyncSnapshot) -> Result<bool, SyncError> {
        let _gate = self.local_gate.lock().await;
        if self.state.marked_since(id, snapshot.revision) {
            debug!(note_id = %id, "Note edited during sync, not removing it");
            return Ok(false);
        }
        self.local.delete_note(id).await?;
        Ok(true)
    }

    /// Replace the local index, keeping records of notes edited since the
    /// snapshot.
    async fn write_local_index(
        &self,
        mut index: IndexDocument,
        snapshot: &SyncSnapshot,
    ) -> Result<(), SyncError> {
        let _gate = self.local_gate.lock().await;
        let raced = self.state.notes_marked_since(snapshot.revision);
        if !raced.is_empty() {
            let current = self.load_local_index().await?;
            merge::overlay_local(&mut index, &current, &raced);
        }
        if self.state.structure_marked_since(snapshot.revision) {
            debug!("Structural edit raced the sync; remote structure wins");
        }
        index.normalize();
        self.local.save_index(&index).await?;
        Ok(())
    }
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("registry", &self.registry)
            .field("transfer", &self.transfer)
            .field("metadata", &self.metadata)
            .finish()
    }
}
