//! Persisted sync-state document
//!
//! The on-disk shape of the local dirty tracker. The live tracker with its
//! snapshot revision lives in `notesync-sync`; this type is only what
//! survives a restart.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, NoteId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateDocument {
    pub dirty: bool,
    #[serde(default)]
    pub dirty_note_ids: Vec<NoteId>,
    #[serde(default)]
    pub deleted_note_ids: Vec<NoteId>,
    #[serde(default)]
    pub last_synced_remote_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_synced_note_hash: BTreeMap<NoteId, ContentHash>,
}

impl SyncStateDocument {
    /// State used when nothing was persisted yet: dirty with no history.
    pub fn fresh() -> Self {
        Self {
            dirty: true,
            dirty_note_ids: Vec::new(),
            deleted_note_ids: Vec::new(),
            last_synced_remote_ts: None,
            last_synced_note_hash: BTreeMap::new(),
        }
    }

    /// `dirty == false` implies both id sets are empty.
    pub fn is_consistent(&self) -> bool {
        self.dirty || (self.dirty_note_ids.is_empty() && self.deleted_note_ids.is_empty())
    }
}
