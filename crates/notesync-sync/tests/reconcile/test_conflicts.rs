//! Resolve path: both sides changed since the last agreement

use std::sync::Arc;
use std::time::Duration;

use notesync_remote::MemoryRemoteStore;
use notesync_sync::SyncPath;

use crate::common::{ids, new_note, remote_index, remote_note, Device};

async fn two_synced_devices() -> (Arc<MemoryRemoteStore>, Device, Device) {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = Device::open(&remote).await;
    let b = Device::open(&remote).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();
    (remote, a, b)
}

/// Let the wall clock move so edit timestamps are strictly ordered.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn later_edit_wins_when_it_syncs_last() {
    let (remote, a, b) = two_synced_devices().await;
    let note = new_note("shared", "v0");
    a.write(&note).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();

    a.edit(&note.id, "from a").await;
    a.engine.sync_now().await.unwrap();
    tick().await;
    b.edit(&note.id, "from b").await;

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Resolve);
    assert_eq!(report.conflicts, 1);
    assert_eq!(b.content(&note.id).await.as_deref(), Some("from b"));

    a.engine.sync_now().await.unwrap();
    assert_eq!(a.content(&note.id).await.as_deref(), Some("from b"));
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "from b");
}

#[tokio::test]
async fn later_edit_wins_when_it_synced_first() {
    let (remote, a, b) = two_synced_devices().await;
    let note = new_note("shared", "v0");
    a.write(&note).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();

    b.edit(&note.id, "older edit on b").await;
    tick().await;
    a.edit(&note.id, "newer edit on a").await;
    a.engine.sync_now().await.unwrap();

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Resolve);
    assert_eq!(report.conflicts, 1);
    assert_eq!(b.content(&note.id).await.as_deref(), Some("newer edit on a"));
    assert!(report.changed_note_ids.contains(&note.id));

    a.engine.sync_now().await.unwrap();
    assert_eq!(a.content(&note.id).await.as_deref(), Some("newer edit on a"));
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "newer edit on a");
}

#[tokio::test]
async fn notes_added_on_both_sides_are_merged() {
    let (remote, a, b) = two_synced_devices().await;
    let from_a = new_note("a", "written on a");
    let from_b = new_note("b", "written on b");
    a.write(&from_a).await;
    a.engine.sync_now().await.unwrap();
    b.write(&from_b).await;

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Resolve);
    assert_eq!(report.conflicts, 0);

    a.engine.sync_now().await.unwrap();
    let expected = ids(&remote_index(&remote).unwrap());
    assert_eq!(expected.len(), 2);
    assert_eq!(ids(&a.index().await), expected);
    assert_eq!(ids(&b.index().await), expected);
    assert_eq!(a.content(&from_b.id).await.as_deref(), Some("written on b"));
    assert_eq!(b.content(&from_a.id).await.as_deref(), Some("written on a"));
}

#[tokio::test]
async fn local_delete_wins_over_remote_edit() {
    let (remote, a, b) = two_synced_devices().await;
    let note = new_note("contested", "v0");
    let other = new_note("other", "stays");
    a.write(&note).await;
    a.write(&other).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();

    a.edit(&other.id, "edited on a").await;
    a.engine.sync_now().await.unwrap();
    b.engine.delete_note(&note.id).await.unwrap().outcome().await;

    let report = b.engine.sync_now().await.unwrap();
    assert_eq!(report.path, SyncPath::Resolve);
    assert!(!remote_index(&remote).unwrap().contains_note(&note.id));
    assert!(remote_note(&remote, &note.id).is_none());
    assert_eq!(b.content(&other.id).await.as_deref(), Some("edited on a"));

    a.engine.sync_now().await.unwrap();
    assert!(a.note(&note.id).await.is_none());
}

#[tokio::test]
async fn local_edit_revives_note_deleted_remotely() {
    let (remote, a, b) = two_synced_devices().await;
    let note = new_note("revived", "v0");
    a.write(&note).await;
    a.engine.sync_now().await.unwrap();
    b.engine.sync_now().await.unwrap();

    a.engine.delete_note(&note.id).await.unwrap().outcome().await;
    a.engine.sync_now().await.unwrap();
    b.edit(&note.id, "still needed").await;

    b.engine.sync_now().await.unwrap();
    assert!(remote_index(&remote).unwrap().contains_note(&note.id));

    a.engine.sync_now().await.unwrap();
    assert_eq!(a.content(&note.id).await.as_deref(), Some("still needed"));
}
