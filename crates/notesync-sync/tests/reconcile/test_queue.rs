//! Edits flowing through the operation queue

use std::sync::Arc;

use notesync_remote::{MemoryRemoteStore, RemoteOp};
use notesync_sync::registry::note_blob_name;
use notesync_sync::{OpOutcome, SyncTrigger};

use crate::common::{new_note, remote_note, Device};

#[tokio::test(start_paused = true)]
async fn rapid_edits_upload_once() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let mut note = new_note("draft", "v1");
    device.write(&note).await;
    remote.reset_calls();

    let mut tickets = Vec::new();
    for content in ["v2", "v3", "v4"] {
        note.set_content(content);
        tickets.push(device.engine.save_note(note.clone()).await.unwrap());
    }
    let mut outcomes = Vec::new();
    for ticket in tickets {
        outcomes.push(ticket.outcome().await);
    }

    assert_eq!(outcomes[0], OpOutcome::Superseded);
    assert_eq!(outcomes[1], OpOutcome::Superseded);
    assert!(outcomes[2].is_success());
    assert_eq!(remote.calls(RemoteOp::Update), 1);
    assert_eq!(remote.calls(RemoteOp::Create), 0);
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "v4");
}

#[tokio::test]
async fn delete_before_upload_touches_nothing_remotely() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let note = new_note("oops", "typo");

    let create = device.engine.save_note(note.clone()).await.unwrap();
    let delete = device.engine.delete_note(&note.id).await.unwrap();

    assert_eq!(create.outcome().await, OpOutcome::Superseded);
    assert_eq!(delete.outcome().await, OpOutcome::Deleted);
    device.engine.queue().wait_idle().await;
    assert_eq!(remote.mutation_calls(), 0);
    assert!(remote.blob_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_work_covers_waiting_updates() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let mut note = new_note("n", "v1");
    device.write(&note).await;
    assert!(!device.engine.has_pending_work());

    note.set_content("v2");
    let ticket = device.engine.save_note(note.clone()).await.unwrap();
    assert!(device.engine.has_pending_work());
    assert_eq!(device.engine.status().pending_operations, 1);

    ticket.outcome().await;
    device.engine.queue().wait_idle().await;
    assert!(!device.engine.has_pending_work());
}

#[tokio::test(start_paused = true)]
async fn sync_now_flushes_waiting_updates() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    let note = new_note("n", "v1");
    device.write(&note).await;
    device.engine.sync_now().await.unwrap();

    let edited = device.edit_without_waiting(&note.id, "v2").await;
    let report = device.engine.sync_now().await.unwrap();

    assert!(report.committed);
    assert!(!device.engine.has_pending_work());
    assert_eq!(remote_note(&remote, &edited.id).unwrap().content, "v2");
    assert!(!device.engine.status().dirty);
}

#[tokio::test]
async fn queued_create_and_background_cycle_share_one_blob() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let device = Device::open(&remote).await;
    device.engine.sync_now().await.unwrap();
    remote.reset_calls();

    let note = new_note("fresh", "only once");
    let name = note_blob_name(&note.id);
    let pause = remote.pause_before(RemoteOp::Create, Some(name.as_str()));
    let ticket = device.engine.save_note(note.clone()).await.unwrap();
    pause.reached().await;

    let orchestrator = Arc::clone(device.engine.orchestrator());
    let cycle = tokio::spawn(async move { orchestrator.run_cycle(SyncTrigger::Poll).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    pause.release();

    assert!(ticket.outcome().await.is_success());
    let report = cycle.await.unwrap().unwrap();
    assert!(report.committed);

    let copies = remote.blob_names().iter().filter(|n| **n == name).count();
    assert_eq!(copies, 1);
    assert_eq!(remote.calls(RemoteOp::Create), 1);
    assert_eq!(remote_note(&remote, &note.id).unwrap().content, "only once");
}

#[tokio::test(start_paused = true)]
async fn full_queue_holds_back_further_edits() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(notesync_store::MemoryLocalStore::new());
    let config = notesync_core::config::ConfigBuilder::new()
        .debounce_ms(50)
        .retry_attempts(1, 1)
        .retry_delays_ms(1, 5)
        .queue_capacity(1)
        .queue_parallelism(1)
        .build();
    let engine = notesync_sync::SyncEngine::open(
        config,
        local,
        remote.clone(),
        Arc::new(notesync_core::ports::NullNotifier),
    )
    .await
    .unwrap();

    let first = new_note("first", "a");
    let second = new_note("second", "b");
    let first_name = note_blob_name(&first.id);
    let pause = remote.pause_before(RemoteOp::Create, Some(first_name.as_str()));
    let first_ticket = engine.save_note(first.clone()).await.unwrap();
    pause.reached().await;

    let blocked = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        engine.queue().enqueue(notesync_sync::BlobOperation::create(
            note_blob_name(&second.id),
            None,
            b"b".to_vec(),
        )),
    )
    .await;
    assert!(blocked.is_err());
    assert_eq!(engine.queue().pending_count(), 1);

    pause.release();
    assert!(first_ticket.outcome().await.is_success());
    let second_ticket = engine.save_note(second.clone()).await.unwrap();
    assert!(second_ticket.outcome().await.is_success());
    assert_eq!(remote_note(&remote, &second.id).unwrap().content, "b");
}
