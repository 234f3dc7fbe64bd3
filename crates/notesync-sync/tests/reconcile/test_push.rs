//! Push path: local changes reach the remote store

use std::sync::Arc;

use chrono::{Duration, Utc};
use notesync_remote::{MemoryRemoteStore, RemoteOp};
use notesync_sync::SyncPath;

use crate::common::{ids, new_note, remote_index, remote_note, Device};

#[tokio::test]
async fn push_makes_remote_match_local() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let a = new_note("a", "alpha");
    let b = new_note("b", "beta");
    device.write(&a).await;
    device.write(&b).await;

    let report = device.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Push);
    assert!(report.committed);

    let published = remote_index(&remote).expect("index uploaded");
    assert_eq!(ids(&published), ids(&device.index().await));
    assert_eq!(remote_note(&remote, &a.id).unwrap().content, "alpha");
    assert_eq!(remote_note(&remote, &b.id).unwrap().content, "beta");

    let status = device.engine.status();
    assert!(!status.dirty);
    assert!(status.dirty_notes.is_empty());
    assert!(status.deleted_notes.is_empty());
}

#[tokio::test]
async fn sync_after_push_changes_nothing() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    device.write(&new_note("a", "alpha")).await;
    device.engine.sync_now().await.unwrap();
    remote.reset_calls();

    let report = device.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Nothing);
    assert!(!report.has_changes());
    assert_eq!(remote.mutation_calls(), 0);
    assert_eq!(remote.calls(RemoteOp::Download), 0);
}

#[tokio::test]
async fn deleted_note_disappears_remotely() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let a = new_note("a", "alpha");
    let b = new_note("b", "beta");
    device.write(&a).await;
    device.write(&b).await;
    device.engine.sync_now().await.unwrap();

    device.engine.delete_note(&a.id).await.unwrap().outcome().await;
    let report = device.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Push);

    assert!(remote_note(&remote, &a.id).is_none());
    assert_eq!(ids(&remote_index(&remote).unwrap()), vec![b.id.clone()]);
    assert!(device.engine.status().deleted_notes.is_empty());
}

#[tokio::test]
async fn local_change_wins_over_skewed_remote_clock() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let note = new_note("skew", "original");
    a.write(&note).await;

    // Remote stamps land an hour ahead of every local clock.
    remote.set_clock_floor(Utc::now() + Duration::hours(1));
    a.engine.sync_now().await.unwrap();

    let b = Device::open(&remote).await;
    b.engine.sync_now().await.unwrap();
    assert_eq!(b.content(&note.id).await.as_deref(), Some("original"));

    let edited = b.edit(&note.id, "edited on b").await;
    assert!(edited.modified < Utc::now() + Duration::minutes(30));

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Push);
    assert_eq!(report.conflicts, 0);
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "edited on b");

    a.engine.sync_now().await.unwrap();
    assert_eq!(a.content(&note.id).await.as_deref(), Some("edited on b"));
}

#[tokio::test]
async fn folders_and_order_are_published() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let folder = a.engine.create_folder("Work").await.unwrap();
    let mut note = new_note("plan", "q3");
    note.set_folder(Some(folder.clone()));
    a.write(&note).await;
    a.engine.sync_now().await.unwrap();

    let b = Device::open(&remote).await;
    b.engine.sync_now().await.unwrap();
    let index = b.index().await;
    let copied = index.folder(&folder).expect("folder pulled");
    assert_eq!(copied.name, "Work");
    assert_eq!(copied.note_ids, vec![note.id.clone()]);
}
