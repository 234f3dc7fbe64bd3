//! Interrupted cycles, races and damaged remote data

use std::sync::Arc;

use notesync_core::domain::IndexDocument;
use notesync_core::ports::{BlobQuery, ILocalStore, IRemoteStore, RemoteError, SyncEvent, SyncStatus};
use notesync_remote::{Fault, MemoryRemoteStore, RemoteOp};
use notesync_store::MemoryLocalStore;
use notesync_sync::registry::{note_blob_name, INDEX_BLOB};
use notesync_sync::{BroadcastNotifier, SyncEngine, SyncError, SyncPath};

use crate::common::{fast_config, new_note, remote_index, remote_note, Device};

fn server_error() -> RemoteError {
    RemoteError::Server {
        status: 500,
        message: "backend unavailable".into(),
    }
}

async fn corrupt_remote_index(remote: &MemoryRemoteStore) {
    let entries = remote
        .list_blobs(&BlobQuery::named(INDEX_BLOB))
        .await
        .unwrap();
    remote
        .update_blob(&entries[0].id, b"{ not an index".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_index_upload_keeps_changes_for_next_cycle() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let note = new_note("important", "do not lose");
    device.write(&note).await;

    remote.inject(Fault::once(RemoteOp::Create, server_error()).on_blob(INDEX_BLOB));
    let err = device.engine.sync_now().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
    assert!(remote_index(&remote).is_none());
    assert!(device.engine.status().dirty);
    assert!(device.engine.status().dirty_notes.contains(&note.id));

    let report = device.engine.sync_now().await.unwrap();
    assert!(report.committed);
    assert!(remote_index(&remote).unwrap().contains_note(&note.id));
    assert!(!device.engine.status().dirty);
}

#[tokio::test]
async fn failed_note_upload_skips_the_commit() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(MemoryLocalStore::new());
    let note = new_note("preexisting", "on disk before sync");
    let mut index = IndexDocument::new();
    index.upsert_note(note.metadata());
    local.save_note(&note).await.unwrap();
    local.save_index(&index).await.unwrap();
    let device = Device::with_store(&remote, local).await;

    remote.inject(
        Fault::once(
            RemoteOp::Create,
            RemoteError::Server {
                status: 400,
                message: "rejected".into(),
            },
        )
        .on_blob(note_blob_name(&note.id)),
    );
    let report = device.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Push);
    assert!(!report.is_success());
    assert!(!report.committed);
    assert!(remote_index(&remote).is_none());

    let report = device.engine.sync_now().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.uploaded, 1);
    assert!(remote_note(&remote, &note.id).is_some());
}

#[tokio::test]
async fn edit_during_cycle_stays_dirty() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let note = new_note("racy", "v1");
    device.write(&note).await;
    device.engine.sync_now().await.unwrap();

    device.edit(&note.id, "v2").await;
    let pause = remote.pause_before(RemoteOp::Update, Some(INDEX_BLOB));
    let engine = Arc::clone(&device.engine);
    let cycle = tokio::spawn(async move { engine.sync_now().await });

    pause.reached().await;
    device.edit_without_waiting(&note.id, "v3").await;
    pause.release();

    let report = cycle.await.unwrap().unwrap();
    assert!(!report.committed);
    assert!(report.deferred);
    let status = device.engine.status();
    assert!(status.dirty);
    assert!(status.dirty_notes.contains(&note.id));

    let report = device.engine.sync_now().await.unwrap();
    assert!(report.committed);
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "v3");
    assert!(!device.engine.status().dirty);
}

#[tokio::test]
async fn corrupt_remote_index_falls_back_to_cache() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let note = new_note("survivor", "x");
    device.write(&note).await;
    device.engine.sync_now().await.unwrap();

    corrupt_remote_index(&remote).await;
    let report = device.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Pull);
    assert!(report.healed_index);
    assert!(device.index().await.contains_note(&note.id));
    assert!(device.engine.status().dirty);

    // The healed index is republished by the next cycle.
    let report = device.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Push);
    assert!(remote_index(&remote).unwrap().contains_note(&note.id));
}

#[tokio::test]
async fn corrupt_remote_index_without_cache_fails_the_cycle() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    a.write(&new_note("x", "y")).await;
    a.engine.sync_now().await.unwrap();
    corrupt_remote_index(&remote).await;

    let b = Device::open(&remote).await;
    let err = b.engine.sync_now().await.unwrap_err();
    assert!(matches!(err, SyncError::Corrupt(_)));
    assert!(b.engine.status().dirty);
}

#[tokio::test]
async fn failed_cycle_does_not_report_synced() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    a.write(&new_note("x", "y")).await;
    a.engine.sync_now().await.unwrap();
    corrupt_remote_index(&remote).await;

    let notifier = Arc::new(BroadcastNotifier::new());
    let mut events = notifier.subscribe();
    let engine = SyncEngine::open(
        fast_config(),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
        notifier.clone(),
    )
    .await
    .unwrap();
    engine.sync_now().await.unwrap_err();

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Status { status } = event {
            statuses.push(status);
        }
    }
    assert_eq!(statuses, vec![SyncStatus::Syncing, SyncStatus::Offline]);
}

#[tokio::test]
async fn failed_cycle_keeps_the_previous_synced_status() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    device.write(&new_note("x", "y")).await;
    device.engine.sync_now().await.unwrap();
    assert_eq!(device.engine.orchestrator().settled_status(), SyncStatus::Synced);

    device.write(&new_note("z", "w")).await;
    remote.inject(Fault::once(RemoteOp::Update, server_error()).on_blob(INDEX_BLOB));
    device.engine.sync_now().await.unwrap_err();
    assert_eq!(device.engine.orchestrator().settled_status(), SyncStatus::Synced);

    remote.set_offline(true);
    device.engine.sync_now().await.unwrap_err();
    assert_eq!(device.engine.orchestrator().settled_status(), SyncStatus::Offline);
}

#[tokio::test]
async fn offline_cycle_reports_disconnection() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let note = new_note("offline", "queued");
    device.engine.sync_now().await.unwrap();

    remote.set_offline(true);
    device.write(&note).await;
    let err = device.engine.sync_now().await.unwrap_err();
    assert!(err.is_disconnected());
    assert!(device.note(&note.id).await.is_some());
    assert!(device.engine.status().dirty_notes.contains(&note.id));

    remote.set_offline(false);
    let report = device.engine.sync_now().await.unwrap();
    assert!(report.committed);
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "queued");
}
