//! JSON file store
//!
//! Implements [`ILocalStore`] on top of a data directory:
//!
//! ```text
//! <data_dir>/
//! ├── index.json
//! ├── sync-state.json
//! ├── notes/
//! │   └── <note-id>.json
//! └── cache/
//!     └── remote-index.json
//! ```
//!
//! ## Design
//!
//! - **Atomic writes**: each document is written to a uniquely named
//!   temporary file in the target directory, flushed to disk, then renamed
//!   over the target.
//! - **Missing vs corrupt**: a missing file loads as `None`; a file that
//!   fails to parse is reported as [`StoreError::Corrupt`].

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use notesync_core::domain::{IndexDocument, Note, NoteId, SyncStateDocument};
use notesync_core::ports::ILocalStore;

use crate::StoreError;

const INDEX_FILE: &str = "index.json";
const SYNC_STATE_FILE: &str = "sync-state.json";
const NOTES_DIR: &str = "notes";
const CACHE_DIR: &str = "cache";
const REMOTE_INDEX_FILE: &str = "remote-index.json";

/// Local store backed by JSON files in a data directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        for dir in [root.clone(), root.join(NOTES_DIR), root.join(CACHE_DIR)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })?;
        }
        debug!(root = %root.display(), "opened JSON file store");
        Ok(Self { root })
    }

    /// Data directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn sync_state_path(&self) -> PathBuf {
        self.root.join(SYNC_STATE_FILE)
    }

    fn note_path(&self, id: &NoteId) -> PathBuf {
        self.root.join(NOTES_DIR).join(format!("{id}.json"))
    }

    fn remote_index_path(&self) -> PathBuf {
        self.root.join(CACHE_DIR).join(REMOTE_INDEX_FILE)
    }
}

// ----------------------------------------------------------------------------
// File helpers
// ----------------------------------------------------------------------------

/// Write `data` to `target` through a temporary file and a rename.
pub(crate) async fn atomic_write(target: &Path, data: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: target.display().to_string(),
        source,
    };

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    debug!(?tmp_path, "writing to temporary file");
    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, target).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_err(e));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    atomic_write(path, &bytes).await
}

// ----------------------------------------------------------------------------
// ILocalStore implementation
// ----------------------------------------------------------------------------

#[async_trait::async_trait]
impl ILocalStore for JsonFileStore {
    async fn load_index(&self) -> anyhow::Result<Option<IndexDocument>> {
        Ok(read_json(&self.index_path()).await?)
    }

    async fn save_index(&self, index: &IndexDocument) -> anyhow::Result<()> {
        Ok(write_json(&self.index_path(), index).await?)
    }

    async fn load_note(&self, id: &NoteId) -> anyhow::Result<Option<Note>> {
        Ok(read_json(&self.note_path(id)).await?)
    }

    async fn save_note(&self, note: &Note) -> anyhow::Result<()> {
        Ok(write_json(&self.note_path(&note.id), note).await?)
    }

    async fn delete_note(&self, id: &NoteId) -> anyhow::Result<()> {
        let path = self.note_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            }
            .into()),
        }
    }

    async fn list_note_ids(&self) -> anyhow::Result<Vec<NoteId>> {
        let dir = self.root.join(NOTES_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                }
                .into())
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match NoteId::new(stem.to_string()) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(file = %name, error = %e, "skipping unrecognised note file"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load_sync_state(&self) -> anyhow::Result<Option<SyncStateDocument>> {
        Ok(read_json(&self.sync_state_path()).await?)
    }

    async fn save_sync_state(&self, state: &SyncStateDocument) -> anyhow::Result<()> {
        Ok(write_json(&self.sync_state_path(), state).await?)
    }

    async fn load_cached_remote_index(&self) -> anyhow::Result<Option<IndexDocument>> {
        Ok(read_json(&self.remote_index_path()).await?)
    }

    async fn save_cached_remote_index(&self, index: &IndexDocument) -> anyhow::Result<()> {
        Ok(write_json(&self.remote_index_path(), index).await?)
    }
}
