//! Shared helpers for the reconciliation tests

use std::sync::Arc;

use notesync_core::config::{Config, ConfigBuilder};
use notesync_core::domain::{IndexDocument, Note, NoteId};
use notesync_core::ports::{ILocalStore, NullNotifier};
use notesync_remote::MemoryRemoteStore;
use notesync_store::MemoryLocalStore;
use notesync_sync::registry::{note_blob_name, INDEX_BLOB};
use notesync_sync::SyncEngine;

/// Short delays and a single attempt so failures surface immediately.
pub fn fast_config() -> Config {
    ConfigBuilder::new()
        .debounce_ms(50)
        .retry_attempts(1, 1)
        .retry_delays_ms(1, 5)
        .polling_base_interval_secs(1)
        .polling_max_interval_secs(4)
        .build()
}

/// One device: a local store and an engine over the shared remote.
pub struct Device {
    pub local: Arc<MemoryLocalStore>,
    pub engine: Arc<SyncEngine>,
}

impl Device {
    pub async fn open(remote: &Arc<MemoryRemoteStore>) -> Self {
        Self::with_store(remote, Arc::new(MemoryLocalStore::new())).await
    }

    pub async fn with_store(remote: &Arc<MemoryRemoteStore>, local: Arc<MemoryLocalStore>) -> Self {
        let engine = SyncEngine::open(
            fast_config(),
            local.clone(),
            remote.clone(),
            Arc::new(NullNotifier),
        )
        .await
        .expect("engine opens");
        Self {
            local,
            engine: Arc::new(engine),
        }
    }

    /// Save a note and wait for its queued upload.
    pub async fn write(&self, note: &Note) {
        let ticket = self.engine.save_note(note.clone()).await.expect("save note");
        ticket.outcome().await;
    }

    /// Edit an existing note and save it.
    pub async fn edit(&self, id: &NoteId, content: &str) -> Note {
        let mut note = self.note(id).await.expect("note exists");
        note.set_content(content);
        self.write(&note).await;
        note
    }

    /// Edit a note without waiting for the queued upload.
    pub async fn edit_without_waiting(&self, id: &NoteId, content: &str) -> Note {
        let mut note = self.note(id).await.expect("note exists");
        note.set_content(content);
        self.engine.save_note(note.clone()).await.expect("save note");
        note
    }

    pub async fn note(&self, id: &NoteId) -> Option<Note> {
        self.local.load_note(id).await.expect("load note")
    }

    pub async fn content(&self, id: &NoteId) -> Option<String> {
        self.note(id).await.map(|n| n.content)
    }

    pub async fn index(&self) -> IndexDocument {
        self.engine.index().await.expect("load index")
    }
}

pub fn new_note(title: &str, content: &str) -> Note {
    Note::new(NoteId::generate(), title, content)
}

pub fn remote_index(remote: &MemoryRemoteStore) -> Option<IndexDocument> {
    remote
        .blob_bytes(INDEX_BLOB)
        .map(|bytes| IndexDocument::from_json_bytes(&bytes).expect("remote index parses"))
}

pub fn remote_note(remote: &MemoryRemoteStore, id: &NoteId) -> Option<Note> {
    remote
        .blob_bytes(&note_blob_name(id))
        .map(|bytes| Note::from_json_bytes(&bytes).expect("remote note parses"))
}

/// Sorted note ids of an index
pub fn ids(index: &IndexDocument) -> Vec<NoteId> {
    let mut ids: Vec<NoteId> = index.note_ids().cloned().collect();
    ids.sort();
    ids
}
