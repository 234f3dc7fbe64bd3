//! Remote executor for queued operations
//!
//! Resolves name-keyed targets through the [`BlobRegistry`], falls back
//! from update to create when the blob is gone, and treats a missing blob
//! as already deleted. Each call holds the blob's registry lock, and a
//! create for a name the registry already knows becomes an update.

use std::sync::Arc;

use tracing::{debug, info};

use notesync_core::domain::RemoteId;
use notesync_core::ports::{BlobMetadata, IRemoteStore, RemoteResult};

use crate::queue::{BlobOperation, OpKind, OperationExecutor};
use crate::registry::{note_id_from_blob, BlobRegistry, UploadRecord};
use crate::retry::RetryPolicy;

pub struct RemoteOpExecutor {
    remote: Arc<dyn IRemoteStore>,
    registry: Arc<BlobRegistry>,
    retry: RetryPolicy,
}

impl RemoteOpExecutor {
    pub fn new(remote: Arc<dyn IRemoteStore>, registry: Arc<BlobRegistry>, retry: RetryPolicy) -> Self {
        Self {
            remote,
            registry,
            retry,
        }
    }

    async fn target(&self, op: &BlobOperation) -> RemoteResult<Option<RemoteId>> {
        match &op.remote_id {
            Some(id) => Ok(Some(id.clone())),
            None => self.registry.resolve(&op.name).await,
        }
    }

    async fn create(&self, op: &BlobOperation) -> RemoteResult<BlobMetadata> {
        let parent = op.parent.as_ref();
        let meta = self
            .retry
            .run("create_blob", || {
                self.remote.create_blob(&op.name, parent, op.bytes.clone())
            })
            .await?;
        info!(name = %op.name, id = %meta.id, "Created remote blob");
        Ok(meta)
    }

    async fn update(&self, op: &BlobOperation) -> RemoteResult<BlobMetadata> {
        let Some(id) = self.target(op).await? else {
            return self.create(op).await;
        };
        let result = self
            .retry
            .run("update_blob", || self.remote.update_blob(&id, op.bytes.clone()))
            .await;
        match result {
            Err(e) if e.is_not_found() => {
                debug!(name = %op.name, id = %id, "Blob vanished, creating it again");
                self.registry.forget(&op.name);
                self.create(op).await
            }
            other => other,
        }
    }

    async fn delete(&self, op: &BlobOperation) -> RemoteResult<()> {
        let Some(id) = self.target(op).await? else {
            debug!(name = %op.name, "Nothing to delete remotely");
            return Ok(());
        };
        match self
            .retry
            .run("delete_blob", || self.remote.delete_blob(&id))
            .await
        {
            Ok(()) => info!(name = %op.name, id = %id, "Deleted remote blob"),
            Err(e) if e.is_not_found() => debug!(name = %op.name, "Blob already deleted"),
            Err(e) => return Err(e),
        }
        self.registry.forget(&op.name);
        Ok(())
    }

    fn record(&self, op: &BlobOperation, meta: &BlobMetadata) {
        self.registry.remember(&op.name, meta.id.clone());
        if let (Some(note_id), Some(hash)) = (note_id_from_blob(&op.name), &op.content_hash) {
            self.registry.record_upload(
                &note_id,
                UploadRecord {
                    remote_id: meta.id.clone(),
                    hash: hash.clone(),
                    modified: meta.modified,
                },
            );
        }
    }
}

#[async_trait::async_trait]
impl OperationExecutor for RemoteOpExecutor {
    async fn execute(&self, op: &BlobOperation) -> RemoteResult<Option<BlobMetadata>> {
        let _guard = self.registry.lock_blob(&op.name).await;
        match op.kind {
            OpKind::Create if self.registry.lookup(&op.name).is_some() => {
                debug!(name = %op.name, "Blob already exists, updating instead");
                let meta = self.update(op).await?;
                self.record(op, &meta);
                Ok(Some(meta))
            }
            OpKind::Create => {
                let meta = self.create(op).await?;
                self.record(op, &meta);
                Ok(Some(meta))
            }
            OpKind::Update => {
                let meta = self.update(op).await?;
                self.record(op, &meta);
                Ok(Some(meta))
            }
            OpKind::Delete => {
                self.delete(op).await?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use notesync_core::domain::{ContentHash, NoteId};
    use notesync_remote::{MemoryRemoteStore, RemoteOp};

    use super::*;

    fn setup() -> (Arc<MemoryRemoteStore>, Arc<BlobRegistry>, RemoteOpExecutor) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let registry = Arc::new(BlobRegistry::new(remote.clone(), None, RetryPolicy::none()));
        let executor = RemoteOpExecutor::new(remote.clone(), registry.clone(), RetryPolicy::none());
        (remote, registry, executor)
    }

    #[tokio::test]
    async fn update_of_unknown_blob_creates_it() {
        let (remote, registry, executor) = setup();
        let hash = ContentHash::digest([b"v1".as_slice()]);
        let op = BlobOperation::update("note-a.json", None, None, b"v1".to_vec()).with_hash(hash.clone());

        let meta = executor.execute(&op).await.unwrap().unwrap();
        assert_eq!(remote.calls(RemoteOp::Create), 1);
        assert_eq!(remote.calls(RemoteOp::Update), 0);
        assert_eq!(registry.lookup("note-a.json"), Some(meta.id.clone()));

        let record = registry.last_upload(&NoteId::new("a".into()).unwrap()).unwrap();
        assert_eq!(record.hash, hash);
        assert_eq!(record.modified, meta.modified);
    }

    #[tokio::test]
    async fn update_falls_back_to_create_when_blob_vanished() {
        let (remote, _registry, executor) = setup();
        let stale = RemoteId::new("blob-404".into()).unwrap();
        let op = BlobOperation::update("note-a.json", None, Some(stale), b"x".to_vec());

        executor.execute(&op).await.unwrap();
        assert_eq!(remote.calls(RemoteOp::Update), 1);
        assert_eq!(remote.calls(RemoteOp::Create), 1);
        assert_eq!(remote.blob_bytes("note-a.json"), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn create_of_known_blob_updates_it() {
        let (remote, registry, executor) = setup();
        let existing = remote.create_blob("note-a.json", None, b"v1".to_vec()).await.unwrap();
        registry.remember("note-a.json", existing.id.clone());
        remote.reset_calls();

        let op = BlobOperation::create("note-a.json", None, b"v2".to_vec());
        let meta = executor.execute(&op).await.unwrap().unwrap();

        assert_eq!(meta.id, existing.id);
        assert_eq!(remote.calls(RemoteOp::Create), 0);
        assert_eq!(remote.calls(RemoteOp::Update), 1);
        assert_eq!(remote.blob_names(), vec!["note-a.json".to_string()]);
        assert_eq!(remote.blob_bytes("note-a.json"), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn delete_of_missing_blob_succeeds() {
        let (remote, _registry, executor) = setup();
        let gone = RemoteId::new("blob-404".into()).unwrap();

        let by_id = BlobOperation::delete("note-a.json", None, Some(gone));
        assert_eq!(executor.execute(&by_id).await.unwrap(), None);

        let by_name = BlobOperation::delete("note-b.json", None, None);
        assert_eq!(executor.execute(&by_name).await.unwrap(), None);
        assert_eq!(remote.calls(RemoteOp::Delete), 1);
    }
}
