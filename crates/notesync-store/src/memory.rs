//! In-memory local store
//!
//! A volatile [`ILocalStore`] for hosts that keep their own persistence and
//! for tests. Documents are cloned in and out so callers never share state
//! with the store. Writes can be made to fail on demand to exercise error
//! paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;

use notesync_core::domain::{IndexDocument, Note, NoteId, SyncStateDocument};
use notesync_core::ports::ILocalStore;

#[derive(Debug, Default)]
struct Documents {
    index: Option<IndexDocument>,
    notes: BTreeMap<NoteId, Note>,
    sync_state: Option<SyncStateDocument>,
    cached_remote_index: Option<IndexDocument>,
}

/// Local store that keeps every document in memory
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    docs: Mutex<Documents>,
    fail_writes: AtomicBool,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Documents> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated write failure");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ILocalStore for MemoryLocalStore {
    async fn load_index(&self) -> anyhow::Result<Option<IndexDocument>> {
        Ok(self.lock().index.clone())
    }

    async fn save_index(&self, index: &IndexDocument) -> anyhow::Result<()> {
        self.check_writable()?;
        self.lock().index = Some(index.clone());
        Ok(())
    }

    async fn load_note(&self, id: &NoteId) -> anyhow::Result<Option<Note>> {
        Ok(self.lock().notes.get(id).cloned())
    }

    async fn save_note(&self, note: &Note) -> anyhow::Result<()> {
        self.check_writable()?;
        self.lock().notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn delete_note(&self, id: &NoteId) -> anyhow::Result<()> {
        self.check_writable()?;
        self.lock().notes.remove(id);
        Ok(())
    }

    async fn list_note_ids(&self) -> anyhow::Result<Vec<NoteId>> {
        Ok(self.lock().notes.keys().cloned().collect())
    }

    async fn load_sync_state(&self) -> anyhow::Result<Option<SyncStateDocument>> {
        Ok(self.lock().sync_state.clone())
    }

    async fn save_sync_state(&self, state: &SyncStateDocument) -> anyhow::Result<()> {
        self.check_writable()?;
        self.lock().sync_state = Some(state.clone());
        Ok(())
    }

    async fn load_cached_remote_index(&self) -> anyhow::Result<Option<IndexDocument>> {
        Ok(self.lock().cached_remote_index.clone())
    }

    async fn save_cached_remote_index(&self, index: &IndexDocument) -> anyhow::Result<()> {
        self.check_writable()?;
        self.lock().cached_remote_index = Some(index.clone());
        Ok(())
    }
}
