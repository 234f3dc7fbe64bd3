//! Blob name registry
//!
//! Maps the well-known blob names to remote ids so most calls can skip a
//! listing, and remembers what was last uploaded for each note.
//!
//! Writers of a blob hold its lock from name resolution until the id is
//! remembered, so a queued create and a sync cycle never both create it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use notesync_core::domain::{ContentHash, NoteId, RemoteId};
use notesync_core::ports::{BlobQuery, IRemoteStore, RemoteResult};

use crate::retry::RetryPolicy;

/// Name of the remote index blob
pub const INDEX_BLOB: &str = "note-list.json";

const NOTE_PREFIX: &str = "note-";
const NOTE_SUFFIX: &str = ".json";

pub fn note_blob_name(id: &NoteId) -> String {
    format!("{NOTE_PREFIX}{id}{NOTE_SUFFIX}")
}

/// Inverse of [`note_blob_name`]; `None` for the index and foreign names
pub fn note_id_from_blob(name: &str) -> Option<NoteId> {
    if name == INDEX_BLOB {
        return None;
    }
    let id = name.strip_prefix(NOTE_PREFIX)?.strip_suffix(NOTE_SUFFIX)?;
    NoteId::new(id.to_string()).ok()
}

/// Whether a blob name belongs to the synced data set
pub fn is_sync_blob(name: &str) -> bool {
    name == INDEX_BLOB || note_id_from_blob(name).is_some()
}

/// Last upload of a note performed by this device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub remote_id: RemoteId,
    pub hash: ContentHash,
    pub modified: DateTime<Utc>,
}

pub struct BlobRegistry {
    remote: Arc<dyn IRemoteStore>,
    parent: Option<RemoteId>,
    retry: RetryPolicy,
    ids: DashMap<String, RemoteId>,
    uploads: DashMap<NoteId, UploadRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BlobRegistry {
    pub fn new(remote: Arc<dyn IRemoteStore>, parent: Option<RemoteId>, retry: RetryPolicy) -> Self {
        Self {
            remote,
            parent,
            retry,
            ids: DashMap::new(),
            uploads: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn parent(&self) -> Option<&RemoteId> {
        self.parent.as_ref()
    }

    /// Cached id only, no remote call
    pub fn lookup(&self, name: &str) -> Option<RemoteId> {
        self.ids.get(name).map(|e| e.value().clone())
    }

    /// Cached id, or a listing by name when unknown.
    pub async fn resolve(&self, name: &str) -> RemoteResult<Option<RemoteId>> {
        if let Some(id) = self.lookup(name) {
            return Ok(Some(id));
        }
        let query = BlobQuery::named(name).in_parent(self.parent.clone());
        let mut entries = self
            .retry
            .run("list_blobs", || self.remote.list_blobs(&query))
            .await?;
        if entries.len() > 1 {
            warn!(name, count = entries.len(), "Several blobs share a name, using the first");
            entries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        }
        let id = entries.into_iter().next().map(|e| e.id);
        if let Some(id) = &id {
            self.remember(name, id.clone());
        }
        Ok(id)
    }

    /// Exclusive access to one blob name for the duration of a write.
    pub async fn lock_blob(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(name.to_string()).or_default().value());
        lock.lock_owned().await
    }

    pub fn remember(&self, name: &str, id: RemoteId) {
        self.ids.insert(name.to_string(), id);
    }

    pub fn forget(&self, name: &str) {
        self.ids.remove(name);
        if let Some(note_id) = note_id_from_blob(name) {
            self.uploads.remove(&note_id);
        }
    }

    /// Replace the cache with a full listing of the sync folder.
    ///
    /// Doubles as the connectivity check when (re)connecting.
    pub async fn warm(&self) -> RemoteResult<usize> {
        let query = BlobQuery::all().in_parent(self.parent.clone());
        let entries = self
            .retry
            .run("list_blobs", || self.remote.list_blobs(&query))
            .await?;
        self.ids.clear();
        for entry in entries.into_iter().filter(|e| is_sync_blob(&e.name)) {
            self.ids.insert(entry.name, entry.id);
        }
        debug!(known = self.ids.len(), "Blob registry warmed");
        Ok(self.ids.len())
    }

    pub fn record_upload(&self, note_id: &NoteId, record: UploadRecord) {
        self.uploads.insert(note_id.clone(), record);
    }

    pub fn last_upload(&self, note_id: &NoteId) -> Option<UploadRecord> {
        self.uploads.get(note_id).map(|e| e.value().clone())
    }
}

impl std::fmt::Debug for BlobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobRegistry")
            .field("parent", &self.parent)
            .field("known", &self.ids.len())
            .field("uploads", &self.uploads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use notesync_core::ports::IRemoteStore;
    use notesync_remote::{MemoryRemoteStore, RemoteOp};

    use super::*;

    fn id(s: &str) -> NoteId {
        NoteId::new(s.to_string()).unwrap()
    }

    #[test]
    fn blob_names_round_trip() {
        assert_eq!(note_blob_name(&id("abc")), "note-abc.json");
        assert_eq!(note_id_from_blob("note-abc.json"), Some(id("abc")));
        assert_eq!(note_id_from_blob(INDEX_BLOB), None);
        assert_eq!(note_id_from_blob("photo.png"), None);
        assert!(is_sync_blob(INDEX_BLOB));
        assert!(is_sync_blob("note-x.json"));
        assert!(!is_sync_blob("readme.txt"));
    }

    #[tokio::test]
    async fn resolve_lists_once_then_uses_cache() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let meta = remote.create_blob("note-a.json", None, vec![]).await.unwrap();
        let registry = BlobRegistry::new(remote.clone(), None, RetryPolicy::none());

        assert_eq!(registry.resolve("note-a.json").await.unwrap(), Some(meta.id.clone()));
        assert_eq!(registry.resolve("note-a.json").await.unwrap(), Some(meta.id));
        assert_eq!(remote.calls(RemoteOp::List), 1);
        assert_eq!(registry.resolve("note-b.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn warm_ignores_foreign_blobs() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.create_blob(INDEX_BLOB, None, vec![]).await.unwrap();
        remote.create_blob("holiday.jpg", None, vec![]).await.unwrap();
        let registry = BlobRegistry::new(remote, None, RetryPolicy::none());

        assert_eq!(registry.warm().await.unwrap(), 1);
        assert!(registry.lookup(INDEX_BLOB).is_some());
        assert!(registry.lookup("holiday.jpg").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn blob_lock_is_exclusive_per_name() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let registry = BlobRegistry::new(remote, None, RetryPolicy::none());

        let held = registry.lock_blob("note-a.json").await;
        let other = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            registry.lock_blob("note-b.json"),
        )
        .await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            registry.lock_blob("note-a.json"),
        )
        .await;
        assert!(same.is_err());

        drop(held);
        let _again = registry.lock_blob("note-a.json").await;
    }

    #[tokio::test]
    async fn forget_drops_upload_record() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let registry = BlobRegistry::new(remote, None, RetryPolicy::none());
        let rid = RemoteId::new("blob-1".into()).unwrap();
        registry.remember("note-a.json", rid.clone());
        registry.record_upload(
            &id("a"),
            UploadRecord {
                remote_id: rid,
                hash: ContentHash::digest([b"x".as_slice()]),
                modified: Utc::now(),
            },
        );

        registry.forget("note-a.json");
        assert!(registry.lookup("note-a.json").is_none());
        assert!(registry.last_upload(&id("a")).is_none());
    }
}
