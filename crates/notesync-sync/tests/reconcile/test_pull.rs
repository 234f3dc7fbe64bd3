//! Pull path: remote changes reach a device without local edits

use std::sync::Arc;

use notesync_core::domain::IndexDocument;
use notesync_core::ports::ILocalStore;
use notesync_remote::{MemoryRemoteStore, RemoteOp};
use notesync_store::MemoryLocalStore;
use notesync_sync::SyncPath;

use crate::common::{ids, new_note, remote_index, Device};

#[tokio::test]
async fn fresh_device_downloads_everything() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let notes = [new_note("a", "1"), new_note("b", "2"), new_note("c", "3")];
    for note in &notes {
        a.write(note).await;
    }
    a.engine.sync_now().await.unwrap();

    let b = Device::open(&remote).await;
    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Pull);
    assert_eq!(report.downloaded, 3);
    assert_eq!(ids(&b.index().await), ids(&a.index().await));
    for note in &notes {
        assert_eq!(b.note(&note.id).await.unwrap(), a.note(&note.id).await.unwrap());
    }
    assert!(!b.engine.status().dirty);
}

#[tokio::test]
async fn first_connect_with_local_notes_keeps_both_sides() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let shared = new_note("from a", "already synced");
    a.write(&shared).await;
    a.engine.sync_now().await.unwrap();

    let b = Device::open(&remote).await;
    let offline_draft = new_note("from b", "written before connecting");
    b.write(&offline_draft).await;

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Resolve);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.conflicts, 0);
    assert!(report.committed);

    let mut expected = vec![shared.id.clone(), offline_draft.id.clone()];
    expected.sort();
    assert_eq!(ids(&b.index().await), expected);
    assert_eq!(ids(&remote_index(&remote).unwrap()), expected);
    assert_eq!(b.content(&shared.id).await.as_deref(), Some("already synced"));
    assert!(!b.engine.status().dirty);

    a.engine.sync_now().await.unwrap();
    assert_eq!(a.content(&offline_draft.id).await.as_deref(), Some("written before connecting"));
}

#[tokio::test]
async fn pull_downloads_only_changed_notes() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let b = Device::open(&remote).await;
    let kept = new_note("kept", "same");
    let changed = new_note("changed", "before");
    a.write(&kept).await;
    a.write(&changed).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();

    a.edit(&changed.id, "after").await;
    a.engine.sync_now().await.unwrap();

    remote.reset_calls();
    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Pull);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.changed_note_ids, vec![changed.id.clone()]);
    // the index plus one note
    assert_eq!(remote.calls(RemoteOp::Download), 2);
    assert_eq!(b.content(&changed.id).await.as_deref(), Some("after"));
}

#[tokio::test]
async fn remote_deletion_removes_synced_note() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let b = Device::open(&remote).await;
    let note = new_note("doomed", "x");
    a.write(&note).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();
    assert!(b.note(&note.id).await.is_some());

    a.engine.delete_note(&note.id).await.unwrap().outcome().await;
    a.engine.sync_now().await.unwrap();

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.deleted_local, 1);
    assert!(b.note(&note.id).await.is_none());
    assert!(!b.index().await.contains_note(&note.id));
}

#[tokio::test]
async fn pull_keeps_notes_that_were_never_synced() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let shared = new_note("shared", "from a");
    a.write(&shared).await;
    a.engine.sync_now().await.unwrap();

    // Notes written before sync was enabled on this device
    let local = Arc::new(MemoryLocalStore::new());
    let offline = new_note("offline", "only on b");
    let mut index = IndexDocument::new();
    index.upsert_note(offline.metadata());
    local.save_note(&offline).await.unwrap();
    local.save_index(&index).await.unwrap();

    let b = Device::with_store(&remote, local).await;
    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Pull);
    assert!(b.note(&offline.id).await.is_some());
    let index = b.index().await;
    assert!(index.contains_note(&offline.id));
    assert!(index.contains_note(&shared.id));
    assert!(b.engine.status().dirty_notes.contains(&offline.id));

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Push);
    assert!(remote_index(&remote).unwrap().contains_note(&offline.id));
    assert!(!b.engine.status().dirty);
}
