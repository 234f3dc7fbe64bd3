//! Local store port (driven/secondary port)
//!
//! This module defines the interface for the durable local document store:
//! the note documents, the index document, the sync-state document and a
//! cached copy of the last known-good remote index.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   the engine only needs to know that a write failed.
//! - Every save is atomic: readers observe either the old or the new
//!   document, never a torn write.
//! - Loads return `Ok(None)` for a missing document; a present but
//!   unreadable document is an error.

use crate::domain::index::IndexDocument;
use crate::domain::newtypes::NoteId;
use crate::domain::note::Note;
use crate::domain::sync_state::SyncStateDocument;

/// Port trait for the local document store
#[async_trait::async_trait]
pub trait ILocalStore: Send + Sync {
    /// Loads the local index document
    async fn load_index(&self) -> anyhow::Result<Option<IndexDocument>>;

    /// Atomically replaces the local index document
    async fn save_index(&self, index: &IndexDocument) -> anyhow::Result<()>;

    /// Loads a single note
    async fn load_note(&self, id: &NoteId) -> anyhow::Result<Option<Note>>;

    /// Atomically writes a single note
    async fn save_note(&self, note: &Note) -> anyhow::Result<()>;

    /// Deletes a note; deleting a missing note succeeds
    async fn delete_note(&self, id: &NoteId) -> anyhow::Result<()>;

    /// Ids of every stored note document
    async fn list_note_ids(&self) -> anyhow::Result<Vec<NoteId>>;

    /// Loads the persisted sync state
    async fn load_sync_state(&self) -> anyhow::Result<Option<SyncStateDocument>>;

    /// Atomically replaces the persisted sync state
    async fn save_sync_state(&self, state: &SyncStateDocument) -> anyhow::Result<()>;

    /// Loads the cached copy of the last known-good remote index
    async fn load_cached_remote_index(&self) -> anyhow::Result<Option<IndexDocument>>;

    /// Replaces the cached remote index
    async fn save_cached_remote_index(&self, index: &IndexDocument) -> anyhow::Result<()>;
}
