//! Note entity and its index metadata
//!
//! A [`Note`] is the full document stored locally as `notes/<id>.json` and
//! remotely as the blob `note-<id>.json`. A [`NoteMetadata`] is the summary
//! record kept in the index document.
//!
//! The content hash covers every user-visible field except the modification
//! timestamp, so two devices that converge on the same text agree on the
//! hash even when their clocks disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, FolderId, NoteId};

/// Language tag used when none is given
pub const DEFAULT_LANGUAGE: &str = "plaintext";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// A single note document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub folder_id: Option<FolderId>,
    /// Local wall-clock time of the last edit. Advisory only.
    #[serde(rename = "modifiedTimestamp")]
    pub modified: DateTime<Utc>,
    pub content_hash: ContentHash,
}

impl Note {
    /// Create a new note stamped with the current time
    pub fn new(id: NoteId, title: impl Into<String>, content: impl Into<String>) -> Self {
        let title = title.into();
        let content = content.into();
        let language = default_language();
        let content_hash = Self::compute_hash(&id, &title, &content, &language, false, None);
        Self {
            id,
            title,
            content,
            language,
            archived: false,
            folder_id: None,
            modified: Utc::now(),
            content_hash,
        }
    }

    /// Digest over id, title, content, language, archived and folder.
    pub fn compute_hash(
        id: &NoteId,
        title: &str,
        content: &str,
        language: &str,
        archived: bool,
        folder_id: Option<&FolderId>,
    ) -> ContentHash {
        let archived: &[u8] = if archived { b"1" } else { b"0" };
        let folder = folder_id.map(FolderId::as_str).unwrap_or("");
        ContentHash::digest([
            id.as_str().as_bytes(),
            title.as_bytes(),
            content.as_bytes(),
            language.as_bytes(),
            archived,
            folder.as_bytes(),
        ])
    }

    /// Recompute `content_hash` from the current fields.
    pub fn rehash(&mut self) {
        self.content_hash = Self::compute_hash(
            &self.id,
            &self.title,
            &self.content,
            &self.language,
            self.archived,
            self.folder_id.as_ref(),
        );
    }

    /// Whether the stored hash matches the current fields
    #[must_use]
    pub fn hash_is_current(&self) -> bool {
        let expected = Self::compute_hash(
            &self.id,
            &self.title,
            &self.content,
            &self.language,
            self.archived,
            self.folder_id.as_ref(),
        );
        expected == self.content_hash
    }

    /// Rehash and stamp the modification time after an edit.
    pub fn touch(&mut self) {
        self.rehash();
        self.modified = Utc::now();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
        self.touch();
    }

    pub fn set_archived(&mut self, archived: bool) {
        self.archived = archived;
        self.touch();
    }

    pub fn set_folder(&mut self, folder_id: Option<FolderId>) {
        self.folder_id = folder_id;
        self.touch();
    }

    /// Summary record for the index document
    #[must_use]
    pub fn metadata(&self) -> NoteMetadata {
        NoteMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            content_hash: self.content_hash.clone(),
            modified: self.modified,
            archived: self.archived,
            folder_id: self.folder_id.clone(),
        }
    }

    /// Serialize for storage or upload
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Parse a stored or downloaded note
    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Per-note record inside the index document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMetadata {
    pub id: NoteId,
    pub title: String,
    pub content_hash: ContentHash,
    #[serde(rename = "modifiedTimestamp")]
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub folder_id: Option<FolderId>,
}
