//! Background polling and queue-drain triggers

use std::sync::Arc;
use std::time::Duration;

use notesync_remote::MemoryRemoteStore;
use tokio_util::sync::CancellationToken;

use crate::common::{new_note, remote_index, Device};

/// Poll `check` with virtual time until it holds.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..120 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

#[tokio::test(start_paused = true)]
async fn poller_pulls_remote_changes() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let writer = Device::open(&remote).await;
    let note = new_note("shared", "first");
    writer.write(&note).await;
    writer.engine.sync_now().await.unwrap();

    let reader = Device::open(&remote).await;
    let shutdown = CancellationToken::new();
    let tasks = reader.engine.start(shutdown.clone());
    let (reader_ref, id) = (&reader, &note.id);

    assert!(eventually(|| async move { reader_ref.content(id).await.as_deref() == Some("first") }).await);

    writer.edit(&note.id, "second").await;
    writer.engine.sync_now().await.unwrap();
    assert!(eventually(|| async move { reader_ref.content(id).await.as_deref() == Some("second") }).await);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
    reader.engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn saved_note_is_published_in_background() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let shutdown = CancellationToken::new();
    let tasks = device.engine.start(shutdown.clone());

    let note = new_note("auto", "saved without sync now");
    device.write(&note).await;

    let (remote_ref, device_ref, id) = (&remote, &device, &note.id);
    assert!(
        eventually(|| async move {
            remote_index(remote_ref).is_some_and(|index| index.contains_note(id))
                && !device_ref.engine.status().dirty
        })
        .await
    );
    assert!(device.engine.status().polling);

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
