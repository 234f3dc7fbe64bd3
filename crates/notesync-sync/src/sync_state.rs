//! Local dirty tracking
//!
//! `SyncState` records which notes changed locally since the last agreement
//! with the remote store, plus the agreement point itself: the remote index
//! timestamp and the per-note hashes it contained.
//!
//! Every mark increments a monotonic revision. A reconciliation cycle takes
//! a [`SyncSnapshot`] when it starts and commits through
//! [`SyncState::clear_if_unchanged`], which only fully clears when no mark
//! happened in between.
//!
//! ```text
//! mark_note_dirty ─┐
//! mark_note_deleted├──→ revision += 1 ──→ dirty = true
//! mark_dirty ──────┘
//!
//! snapshot(rev=N) ... cycle ... clear_if_unchanged(N)
//!                                   ├─ rev == N → clean, record agreement
//!                                   └─ rev != N → drop ids marked ≤ N only
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use notesync_core::domain::{ContentHash, NoteId, SyncStateDocument};
use notesync_core::ports::ILocalStore;

/// Point-in-time copy of the sync state taken at the start of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub revision: u64,
    pub dirty: bool,
    pub dirty_note_ids: Vec<NoteId>,
    pub deleted_note_ids: Vec<NoteId>,
    pub last_synced_remote_ts: Option<DateTime<Utc>>,
    pub last_synced_note_hash: BTreeMap<NoteId, ContentHash>,
}

impl SyncSnapshot {
    pub fn is_dirty_note(&self, id: &NoteId) -> bool {
        self.dirty_note_ids.contains(id)
    }

    pub fn is_deleted_note(&self, id: &NoteId) -> bool {
        self.deleted_note_ids.contains(id)
    }

    pub fn last_synced_hash(&self, id: &NoteId) -> Option<&ContentHash> {
        self.last_synced_note_hash.get(id)
    }

    /// Whether the "locally dirty" input of the path decision is set.
    ///
    /// A dirty flag with no ids and no previous agreement only means that
    /// nothing was ever persisted, which must not force a resolve on the
    /// first connection.
    pub fn has_local_changes(&self) -> bool {
        if !self.dirty {
            return false;
        }
        self.last_synced_remote_ts.is_some()
            || !self.dirty_note_ids.is_empty()
            || !self.deleted_note_ids.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    dirty: bool,
    /// note id → revision of its latest mark
    dirty_ids: BTreeMap<NoteId, u64>,
    deleted_ids: BTreeMap<NoteId, u64>,
    /// revision of the latest structural mark
    structure_rev: Option<u64>,
    last_synced_remote_ts: Option<DateTime<Utc>>,
    last_synced_hash: BTreeMap<NoteId, ContentHash>,
}

/// Thread-safe dirty tracking shared by the engine and the orchestrator
#[derive(Debug)]
pub struct SyncState {
    inner: Mutex<Inner>,
    /// Serializes persists so an older document never overwrites a newer one
    persist_lock: tokio::sync::Mutex<()>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::from_document(SyncStateDocument::fresh())
    }
}

impl SyncState {
    /// Fresh state: dirty, no agreement recorded.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: SyncStateDocument) -> Self {
        let mut inner = Inner {
            dirty: doc.dirty,
            last_synced_remote_ts: doc.last_synced_remote_ts,
            last_synced_hash: doc.last_synced_note_hash,
            ..Inner::default()
        };
        for id in doc.dirty_note_ids {
            inner.dirty_ids.insert(id, 0);
        }
        for id in doc.deleted_note_ids {
            inner.dirty_ids.remove(&id);
            inner.deleted_ids.insert(id, 0);
        }
        if !inner.dirty_ids.is_empty() || !inner.deleted_ids.is_empty() {
            inner.dirty = true;
        }
        Self {
            inner: Mutex::new(inner),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn to_document(&self) -> SyncStateDocument {
        let inner = self.lock();
        SyncStateDocument {
            dirty: inner.dirty,
            dirty_note_ids: inner.dirty_ids.keys().cloned().collect(),
            deleted_note_ids: inner.deleted_ids.keys().cloned().collect(),
            last_synced_remote_ts: inner.last_synced_remote_ts,
            last_synced_note_hash: inner.last_synced_hash.clone(),
        }
    }

    /// Load the persisted state. Absence or a read failure yields a fresh,
    /// dirty state.
    pub async fn load(store: &dyn ILocalStore) -> Self {
        match store.load_sync_state().await {
            Ok(Some(doc)) => Self::from_document(doc),
            Ok(None) => {
                debug!("No persisted sync state, starting dirty");
                Self::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load sync state, starting dirty");
                Self::new()
            }
        }
    }

    pub async fn persist(&self, store: &dyn ILocalStore) -> anyhow::Result<()> {
        let _guard = self.persist_lock.lock().await;
        let doc = self.to_document();
        store.save_sync_state(&doc).await
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Marks
    // ------------------------------------------------------------------

    pub fn mark_note_dirty(&self, id: &NoteId) {
        let mut inner = self.lock();
        inner.revision += 1;
        let rev = inner.revision;
        inner.dirty = true;
        inner.deleted_ids.remove(id);
        inner.dirty_ids.insert(id.clone(), rev);
    }

    pub fn mark_note_deleted(&self, id: &NoteId) {
        let mut inner = self.lock();
        inner.revision += 1;
        let rev = inner.revision;
        inner.dirty = true;
        inner.dirty_ids.remove(id);
        inner.deleted_ids.insert(id.clone(), rev);
    }

    /// Mark a structural change (folders, order, collapse state).
    pub fn mark_dirty(&self) {
        let mut inner = self.lock();
        inner.revision += 1;
        inner.structure_rev = Some(inner.revision);
        inner.dirty = true;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Whether the remote index timestamp differs from the last agreement.
    pub fn remote_changed_since(&self, remote_ts: DateTime<Utc>) -> bool {
        self.lock().last_synced_remote_ts != Some(remote_ts)
    }

    /// Whether `id` was marked dirty or deleted after `revision`.
    pub fn marked_since(&self, id: &NoteId, revision: u64) -> bool {
        let inner = self.lock();
        inner
            .dirty_ids
            .get(id)
            .or_else(|| inner.deleted_ids.get(id))
            .is_some_and(|rev| *rev > revision)
    }

    /// Ids marked dirty or deleted after `revision`
    pub fn notes_marked_since(&self, revision: u64) -> Vec<NoteId> {
        let inner = self.lock();
        inner
            .dirty_ids
            .iter()
            .chain(inner.deleted_ids.iter())
            .filter(|(_, rev)| **rev > revision)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn structure_marked_since(&self, revision: u64) -> bool {
        self.lock().structure_rev.is_some_and(|rev| rev > revision)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let inner = self.lock();
        SyncSnapshot {
            revision: inner.revision,
            dirty: inner.dirty,
            dirty_note_ids: inner.dirty_ids.keys().cloned().collect(),
            deleted_note_ids: inner.deleted_ids.keys().cloned().collect(),
            last_synced_remote_ts: inner.last_synced_remote_ts,
            last_synced_note_hash: inner.last_synced_hash.clone(),
        }
    }

    pub fn dirty_note_ids(&self) -> Vec<NoteId> {
        self.lock().dirty_ids.keys().cloned().collect()
    }

    pub fn deleted_note_ids(&self) -> Vec<NoteId> {
        self.lock().deleted_ids.keys().cloned().collect()
    }

    pub fn last_synced_remote_ts(&self) -> Option<DateTime<Utc>> {
        self.lock().last_synced_remote_ts
    }

    pub fn last_synced_hash(&self, id: &NoteId) -> Option<ContentHash> {
        self.lock().last_synced_hash.get(id).cloned()
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Record a new agreement with the remote store.
    ///
    /// When no mark happened since `snapshot_revision`, the state becomes
    /// clean and `new_remote_ts` is recorded. Otherwise only ids marked at
    /// or before the snapshot are cleared, the hashes are replaced, the
    /// timestamp is left alone so the next cycle compares again, and
    /// `false` is returned.
    pub fn clear_if_unchanged(
        &self,
        snapshot_revision: u64,
        new_remote_ts: DateTime<Utc>,
        new_hashes: BTreeMap<NoteId, ContentHash>,
    ) -> bool {
        let mut inner = self.lock();
        inner.last_synced_hash = new_hashes;

        if inner.revision == snapshot_revision {
            inner.dirty = false;
            inner.dirty_ids.clear();
            inner.deleted_ids.clear();
            inner.structure_rev = None;
            inner.last_synced_remote_ts = Some(new_remote_ts);
            return true;
        }

        inner.dirty_ids.retain(|_, rev| *rev > snapshot_revision);
        inner.deleted_ids.retain(|_, rev| *rev > snapshot_revision);
        inner.dirty = true;
        debug!(
            snapshot_revision,
            current_revision = inner.revision,
            remaining = inner.dirty_ids.len() + inner.deleted_ids.len(),
            "Local edits raced the commit, keeping them dirty"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use notesync_store::MemoryLocalStore;

    use super::*;

    fn id(s: &str) -> NoteId {
        NoteId::new(s.to_string()).unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn new_state_is_dirty_without_local_changes() {
        let state = SyncState::new();
        assert!(state.is_dirty());
        assert!(!state.snapshot().has_local_changes());
    }

    #[test]
    fn marks_bump_revision() {
        let state = SyncState::new();
        let start = state.revision();
        state.mark_note_dirty(&id("a"));
        state.mark_note_deleted(&id("b"));
        state.mark_dirty();
        assert_eq!(state.revision(), start + 3);
        assert_eq!(state.dirty_note_ids(), vec![id("a")]);
        assert_eq!(state.deleted_note_ids(), vec![id("b")]);
    }

    #[test]
    fn delete_replaces_dirty_mark() {
        let state = SyncState::new();
        state.mark_note_dirty(&id("a"));
        state.mark_note_deleted(&id("a"));
        assert!(state.dirty_note_ids().is_empty());
        assert_eq!(state.deleted_note_ids(), vec![id("a")]);
    }

    #[test]
    fn clear_with_matching_revision_cleans_everything() {
        let state = SyncState::new();
        state.mark_note_dirty(&id("a"));
        let snap = state.snapshot();

        assert!(state.clear_if_unchanged(snap.revision, ts(10), BTreeMap::new()));
        assert!(!state.is_dirty());
        assert!(state.dirty_note_ids().is_empty());
        assert_eq!(state.last_synced_remote_ts(), Some(ts(10)));
        assert!(!state.remote_changed_since(ts(10)));
        assert!(state.remote_changed_since(ts(11)));
    }

    #[test]
    fn racing_mark_survives_commit() {
        let state = SyncState::new();
        state.mark_note_dirty(&id("a"));
        let snap = state.snapshot();
        state.mark_note_dirty(&id("b"));

        assert!(!state.clear_if_unchanged(snap.revision, ts(10), BTreeMap::new()));
        assert!(state.is_dirty());
        assert_eq!(state.dirty_note_ids(), vec![id("b")]);
        assert_eq!(state.last_synced_remote_ts(), None);
        assert!(state.marked_since(&id("b"), snap.revision));
        assert!(!state.marked_since(&id("a"), snap.revision));
    }

    #[test]
    fn re_edit_of_snapshotted_note_is_kept() {
        let state = SyncState::new();
        state.mark_note_dirty(&id("a"));
        let snap = state.snapshot();
        state.mark_note_dirty(&id("a"));

        assert!(!state.clear_if_unchanged(snap.revision, ts(10), BTreeMap::new()));
        assert_eq!(state.dirty_note_ids(), vec![id("a")]);
    }

    #[test]
    fn structural_mark_since_snapshot_is_reported() {
        let state = SyncState::new();
        let snap = state.snapshot();
        assert!(!state.structure_marked_since(snap.revision));
        state.mark_dirty();
        assert!(state.structure_marked_since(snap.revision));
    }

    #[test]
    fn document_round_trip_keeps_ids() {
        let state = SyncState::new();
        state.mark_note_dirty(&id("a"));
        state.mark_note_deleted(&id("b"));
        let doc = state.to_document();
        assert!(doc.is_consistent());

        let restored = SyncState::from_document(doc);
        assert!(restored.is_dirty());
        assert_eq!(restored.dirty_note_ids(), vec![id("a")]);
        assert_eq!(restored.deleted_note_ids(), vec![id("b")]);
    }

    #[test]
    fn inconsistent_document_is_repaired_to_dirty() {
        let mut doc = SyncStateDocument::fresh();
        doc.dirty = false;
        doc.dirty_note_ids.push(id("a"));
        assert!(SyncState::from_document(doc).is_dirty());
    }

    #[tokio::test]
    async fn load_failure_starts_dirty() {
        let store = MemoryLocalStore::new();
        let state = SyncState::load(&store).await;
        assert!(state.is_dirty());

        state.clear_if_unchanged(state.revision(), ts(5), BTreeMap::new());
        state.persist(&store).await.unwrap();
        let reloaded = SyncState::load(&store).await;
        assert!(!reloaded.is_dirty());
        assert_eq!(reloaded.last_synced_remote_ts(), Some(ts(5)));
    }
}
