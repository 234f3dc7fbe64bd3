//! Shared-directory remote store
//!
//! Stores blobs under a directory that several devices can reach, for
//! example a folder mirrored by a file-sync client or a network share.
//!
//! ```text
//! <root>/
//! ├── blobs/
//! │   ├── <id>.bin         content
//! │   └── <id>.meta.json   {id, name, parent, modified}
//! ├── changes.jsonl        append-only change journal
//! └── clock.json           {seq, lastModified}
//! ```
//!
//! Writes within one process are serialized by an async mutex. Content and
//! metadata files are replaced through a temporary file and a rename so a
//! reader never sees a partial blob. A missing root is reported as a
//! network error: the share is treated as unreachable, not empty.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use notesync_core::domain::{ChangeToken, RemoteId};
use notesync_core::ports::{
    BlobEntry, BlobMetadata, BlobQuery, ChangePage, IRemoteStore, RemoteChange, RemoteError,
    RemoteResult,
};

use crate::{next_timestamp, token};

const BLOBS_DIR: &str = "blobs";
const JOURNAL_FILE: &str = "changes.jsonl";
const CLOCK_FILE: &str = "clock.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobMeta {
    id: RemoteId,
    name: String,
    parent: Option<RemoteId>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Clock {
    seq: u64,
    last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    seq: u64,
    #[serde(flatten)]
    change: RemoteChange,
}

fn map_io(context: &str, e: std::io::Error) -> RemoteError {
    match e.kind() {
        ErrorKind::NotFound => RemoteError::NotFound(context.to_string()),
        ErrorKind::PermissionDenied => RemoteError::PermissionDenied(context.to_string()),
        ErrorKind::TimedOut => RemoteError::Timeout(context.to_string()),
        _ => RemoteError::Network(format!("{context}: {e}")),
    }
}

async fn replace_file(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = target.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Remote store rooted in a shared directory
#[derive(Debug)]
pub struct DirectoryRemoteStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryRemoteStore {
    /// Open a store at `root`, creating its layout when absent.
    pub async fn open(root: impl Into<PathBuf>) -> RemoteResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(BLOBS_DIR))
            .await
            .map_err(|e| map_io(&root.display().to_string(), e))?;
        debug!(root = %root.display(), "opened directory remote store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, id: &RemoteId) -> PathBuf {
        self.root.join(BLOBS_DIR).join(format!("{id}.bin"))
    }

    fn meta_path(&self, id: &RemoteId) -> PathBuf {
        self.root.join(BLOBS_DIR).join(format!("{id}.meta.json"))
    }

    async fn ensure_reachable(&self) -> RemoteResult<()> {
        match tokio::fs::metadata(self.root.join(BLOBS_DIR)).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(RemoteError::InvalidResponse(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RemoteError::Network(format!(
                "store directory unavailable: {}",
                self.root.display()
            ))),
            Err(e) => Err(map_io(&self.root.display().to_string(), e)),
        }
    }

    async fn read_meta(&self, id: &RemoteId) -> RemoteResult<BlobMeta> {
        let bytes = tokio::fs::read(self.meta_path(id))
            .await
            .map_err(|e| map_io(id.as_str(), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::InvalidResponse(format!("metadata for {id}: {e}")))
    }

    async fn write_meta(&self, meta: &BlobMeta) -> RemoteResult<()> {
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        replace_file(&self.meta_path(&meta.id), &bytes)
            .await
            .map_err(|e| map_io(meta.id.as_str(), e))
    }

    async fn read_clock(&self) -> RemoteResult<Clock> {
        match tokio::fs::read(self.root.join(CLOCK_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| RemoteError::InvalidResponse(format!("clock: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Clock::default()),
            Err(e) => Err(map_io(CLOCK_FILE, e)),
        }
    }

    /// Stamp a write, append it to the journal and advance the clock.
    /// Callers hold `write_lock`.
    async fn commit_change(
        &self,
        id: &RemoteId,
        name: &str,
        removed: bool,
        clock: &mut Clock,
        modified: DateTime<Utc>,
    ) -> RemoteResult<()> {
        clock.seq += 1;
        clock.last_modified = Some(modified);
        let entry = JournalEntry {
            seq: clock.seq,
            change: RemoteChange {
                id: id.clone(),
                name: Some(name.to_string()),
                removed,
            },
        };
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        line.push(b'\n');

        let mut journal = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(JOURNAL_FILE))
            .await
            .map_err(|e| map_io(JOURNAL_FILE, e))?;
        journal
            .write_all(&line)
            .await
            .map_err(|e| map_io(JOURNAL_FILE, e))?;

        let clock_bytes = serde_json::to_vec(clock)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        replace_file(&self.root.join(CLOCK_FILE), &clock_bytes)
            .await
            .map_err(|e| map_io(CLOCK_FILE, e))
    }

    async fn read_journal(&self) -> RemoteResult<Vec<JournalEntry>> {
        let text = match tokio::fs::read_to_string(self.root.join(JOURNAL_FILE)).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(JOURNAL_FILE, e)),
        };
        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                // A torn trailing line from an interrupted append
                Err(e) => warn!(error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(entries)
    }

    async fn write_blob(&self, meta: BlobMeta, bytes: &[u8], mut clock: Clock) -> RemoteResult<BlobMetadata> {
        replace_file(&self.content_path(&meta.id), bytes)
            .await
            .map_err(|e| map_io(meta.id.as_str(), e))?;
        self.write_meta(&meta).await?;
        self.commit_change(&meta.id, &meta.name, false, &mut clock, meta.modified)
            .await?;
        Ok(BlobMetadata {
            id: meta.id,
            name: meta.name,
            modified: meta.modified,
        })
    }
}

#[async_trait::async_trait]
impl IRemoteStore for DirectoryRemoteStore {
    async fn create_blob(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
        bytes: Vec<u8>,
    ) -> RemoteResult<BlobMetadata> {
        self.ensure_reachable().await?;
        let _guard = self.write_lock.lock().await;
        let clock = self.read_clock().await?;
        let id = RemoteId::new(uuid::Uuid::new_v4().simple().to_string())
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let meta = BlobMeta {
            id,
            name: name.to_string(),
            parent: parent.cloned(),
            modified: next_timestamp(clock.last_modified),
        };
        debug!(blob = %meta.id, name, "creating blob");
        self.write_blob(meta, &bytes, clock).await
    }

    async fn update_blob(&self, id: &RemoteId, bytes: Vec<u8>) -> RemoteResult<BlobMetadata> {
        self.ensure_reachable().await?;
        let _guard = self.write_lock.lock().await;
        let mut meta = self.read_meta(id).await?;
        let clock = self.read_clock().await?;
        meta.modified = next_timestamp(clock.last_modified);
        self.write_blob(meta, &bytes, clock).await
    }

    async fn delete_blob(&self, id: &RemoteId) -> RemoteResult<()> {
        self.ensure_reachable().await?;
        let _guard = self.write_lock.lock().await;
        let meta = self.read_meta(id).await?;
        tokio::fs::remove_file(self.meta_path(id))
            .await
            .map_err(|e| map_io(id.as_str(), e))?;
        match tokio::fs::remove_file(self.content_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(map_io(id.as_str(), e)),
        }
        let mut clock = self.read_clock().await?;
        let modified = next_timestamp(clock.last_modified);
        self.commit_change(id, &meta.name, true, &mut clock, modified)
            .await
    }

    async fn get_metadata(&self, id: &RemoteId) -> RemoteResult<BlobMetadata> {
        self.ensure_reachable().await?;
        let meta = self.read_meta(id).await?;
        Ok(BlobMetadata {
            id: meta.id,
            name: meta.name,
            modified: meta.modified,
        })
    }

    async fn list_blobs(&self, query: &BlobQuery) -> RemoteResult<Vec<BlobEntry>> {
        self.ensure_reachable().await?;
        let dir = self.root.join(BLOBS_DIR);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io(BLOBS_DIR, e))?;

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| map_io(BLOBS_DIR, e))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_suffix(".meta.json") else {
                continue;
            };
            let Ok(id) = RemoteId::new(stem.to_string()) else {
                continue;
            };
            let meta = match self.read_meta(&id).await {
                Ok(meta) => meta,
                // Deleted between read_dir and read
                Err(RemoteError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if query.matches(&meta.name, meta.parent.as_ref()) {
                out.push(BlobEntry {
                    id: meta.id,
                    name: meta.name,
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn download_blob(&self, id: &RemoteId) -> RemoteResult<Vec<u8>> {
        self.ensure_reachable().await?;
        tokio::fs::read(self.content_path(id))
            .await
            .map_err(|e| map_io(id.as_str(), e))
    }

    async fn get_start_token(&self) -> RemoteResult<ChangeToken> {
        self.ensure_reachable().await?;
        token::encode(self.read_clock().await?.seq)
    }

    async fn list_changes(&self, since: &ChangeToken) -> RemoteResult<ChangePage> {
        self.ensure_reachable().await?;
        let after = token::decode(since)?;
        let clock = self.read_clock().await?;
        if after > clock.seq {
            return Err(RemoteError::InvalidToken(since.to_string()));
        }
        let changes = self
            .read_journal()
            .await?
            .into_iter()
            .filter(|e| e.seq > after && e.seq <= clock.seq)
            .map(|e| e.change)
            .collect();
        Ok(ChangePage {
            changes,
            new_token: token::encode(clock.seq)?,
        })
    }
}
