//! End-to-end lifecycle tests over the in-memory ports, driven entirely by
//! the paused tokio clock so the debounce and convergence windows elapse
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use inflow_core::gate::{MemoryGate, MetadataGate};
use inflow_core::record::{FolderRecord, FolderState, WorkQueueEntry};
use inflow_core::store::MemoryObjectStore;
use inflow_core::testsupport::RecordingNotifier;
use inflow_core::{FolderWatchService, ObjectCreatedEvent, WatchConfig};

struct Harness {
    service: Arc<FolderWatchService>,
    gate: Arc<MemoryGate>,
    store: Arc<MemoryObjectStore>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let gate = Arc::new(MemoryGate::default());
    let store = Arc::new(MemoryObjectStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let config = WatchConfig {
        monitored_prefixes: vec!["test/".to_string()],
        ..WatchConfig::default()
    };
    let service = FolderWatchService::new(
        config,
        gate.clone(),
        store.clone(),
        notifier.clone(),
    );
    Harness {
        service,
        gate,
        store,
        notifier,
    }
}

fn event(key: &str) -> ObjectCreatedEvent {
    ObjectCreatedEvent {
        bucket: "incoming-data".to_string(),
        name: key.to_string(),
        time_created: "2026-01-05T10:00:00Z".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn quiet_folder_finalizes_then_completes_on_convergence() {
    let h = harness();
    h.store
        .put_object("incoming-data", "test/a/f1.jsonl.gz", vec![0u8; 10])
        .await;
    h.service
        .handle_object_created(&event("test/a/f1.jsonl.gz"))
        .await
        .unwrap();
    assert_eq!(h.notifier.initial_posts(), vec!["test/a".to_string()]);

    // Polls at 15s intervals see nothing new; the 60s window elapses and the
    // upload finalizes, after which the processing monitor's first check
    // finds one file still unprocessed.
    tokio::time::sleep(Duration::from_secs(61)).await;
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::UploadFinal);
    assert_eq!(record.file_count, 1);
    assert_eq!(record.total_size_bytes, 10);
    assert_eq!(h.gate.work_queue_len().await, 1);
    let updates = h.notifier.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].1.processing_remaining, None);
    assert_eq!(updates[1].1.processing_remaining, Some(1));

    // The processor catches up; the next convergence check completes the
    // folder and drains the queue.
    h.store
        .put_object(
            "outgoing-data",
            "contextualized/test/a/f1.jsonl.gz",
            vec![0u8; 10],
        )
        .await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::ProcessingComplete);
    assert_eq!(h.gate.work_queue_len().await, 0);
    assert_eq!(h.notifier.last_update().unwrap().processing_remaining, Some(0));
}

#[tokio::test(start_paused = true)]
async fn new_arrivals_reset_the_inactivity_window() {
    let h = harness();
    h.store
        .put_object("incoming-data", "test/a/f1.jsonl.gz", vec![0u8; 10])
        .await;
    h.service
        .handle_object_created(&event("test/a/f1.jsonl.gz"))
        .await
        .unwrap();

    // A second file lands 20s in; the 30s poll discovers it and resets the
    // clock, so the folder must still be open when the original window would
    // have expired.
    tokio::time::sleep(Duration::from_secs(20)).await;
    h.store
        .put_object("incoming-data", "test/a/f2.jsonl.gz", vec![0u8; 10])
        .await;
    tokio::time::sleep(Duration::from_secs(54)).await;
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::Open);

    // Quiet from t=30 onward finalizes at the 90s poll, counting both files.
    tokio::time::sleep(Duration::from_secs(21)).await;
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::UploadFinal);
    assert_eq!(record.file_count, 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_events_feed_the_same_monitor() {
    let h = harness();
    for key in ["test/a/f1.jsonl.gz", "test/a/f1.jsonl.gz", "test/a/f2.jsonl.gz"] {
        h.store
            .put_object("incoming-data", key, vec![0u8; 5])
            .await;
        h.service.handle_object_created(&event(key)).await.unwrap();
    }
    assert_eq!(h.notifier.initial_posts().len(), 1);
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.generation, 1);
}

fn seeded_entry(folder: &str, file_count: u64, total_size_bytes: u64) -> WorkQueueEntry {
    WorkQueueEntry {
        folder_path: folder.to_string(),
        file_count,
        total_size_bytes,
        enqueued_at: Utc::now(),
    }
}

async fn seed_finalized(h: &Harness, folder: &str, file_count: u64, total_size_bytes: u64) {
    let mut record = FolderRecord::opened(folder, "2026-01-05T10:00:00Z");
    record.state = FolderState::UploadFinal;
    record.file_count = file_count;
    record.total_size_bytes = total_size_bytes;
    record.upload_final_at = Some(Utc::now());
    h.gate.seed_record(record).await;
    h.gate
        .seed_work(seeded_entry(folder, file_count, total_size_bytes))
        .await;
}

#[tokio::test(start_paused = true)]
async fn sweep_completes_orphaned_converged_folders() {
    let h = harness();
    // Queue entry snapshot is stale on purpose: three files actually landed.
    seed_finalized(&h, "test/a", 2, 20).await;
    for i in 0..3 {
        h.store
            .put_object(
                "incoming-data",
                &format!("test/a/f{i}.jsonl.gz"),
                vec![0u8; 10],
            )
            .await;
        h.store
            .put_object(
                "outgoing-data",
                &format!("contextualized/test/a/f{i}.jsonl.gz"),
                vec![0u8; 10],
            )
            .await;
    }

    let report = h.service.run_sweep_once().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.completed, 1);

    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::ProcessingComplete);
    assert_eq!(record.file_count, 3);
    assert_eq!(record.total_size_bytes, 30);
    assert_eq!(h.gate.work_queue_len().await, 0);
    let last = h.notifier.last_update().unwrap();
    assert_eq!(last.processing_remaining, Some(0));
    assert_eq!(last.file_count, 3);
}

#[tokio::test(start_paused = true)]
async fn sweep_leaves_unconverged_folders_queued() {
    let h = harness();
    seed_finalized(&h, "test/a", 2, 20).await;
    for i in 0..2 {
        h.store
            .put_object(
                "incoming-data",
                &format!("test/a/f{i}.jsonl.gz"),
                vec![0u8; 10],
            )
            .await;
    }
    // Only one of two outputs has been produced.
    h.store
        .put_object(
            "outgoing-data",
            "contextualized/test/a/f0.jsonl.gz",
            vec![0u8; 10],
        )
        .await;

    let report = h.service.run_sweep_once().await;
    assert_eq!(report.completed, 0);
    let record = h.gate.get("test/a").await.unwrap().unwrap();
    assert_eq!(record.state, FolderState::UploadFinal);
    assert_eq!(h.gate.work_queue_len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_defers_completion_when_notification_fails() {
    let h = harness();
    seed_finalized(&h, "test/a", 1, 10).await;
    h.store
        .put_object("incoming-data", "test/a/f0.jsonl.gz", vec![0u8; 10])
        .await;
    h.store
        .put_object(
            "outgoing-data",
            "contextualized/test/a/f0.jsonl.gz",
            vec![0u8; 10],
        )
        .await;

    h.notifier.fail_updates(true);
    let report = h.service.run_sweep_once().await;
    assert_eq!(report.completed, 0);
    assert_eq!(
        h.gate.get("test/a").await.unwrap().unwrap().state,
        FolderState::UploadFinal
    );

    // Next pass succeeds once the transport recovers.
    h.notifier.fail_updates(false);
    let report = h.service.run_sweep_once().await;
    assert_eq!(report.completed, 1);
    assert_eq!(
        h.gate.get("test/a").await.unwrap().unwrap().state,
        FolderState::ProcessingComplete
    );
}

#[tokio::test(start_paused = true)]
async fn sweep_skips_folders_owned_by_live_monitors() {
    let h = harness();
    seed_finalized(&h, "test/a", 2, 20).await;
    h.store
        .put_object("incoming-data", "test/a/f0.jsonl.gz", vec![0u8; 10])
        .await;
    // A late event claims a local processing monitor for the folder.
    h.service
        .handle_object_created(&event("test/a/f0.jsonl.gz"))
        .await
        .unwrap();

    let report = h.service.run_sweep_once().await;
    assert_eq!(report.skipped_live, 1);
    assert_eq!(report.checked, 0);
    assert_eq!(
        h.gate.get("test/a").await.unwrap().unwrap().state,
        FolderState::UploadFinal
    );
}

#[tokio::test(start_paused = true)]
async fn sweep_defers_folders_with_no_incoming_files() {
    let h = harness();
    seed_finalized(&h, "test/vanished", 2, 20).await;

    let report = h.service.run_sweep_once().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(h.gate.work_queue_len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn reconcile_folder_drives_single_folder_to_completion() {
    let h = harness();
    seed_finalized(&h, "test/a", 1, 10).await;
    h.store
        .put_object("incoming-data", "test/a/f0.jsonl.gz", vec![0u8; 10])
        .await;
    h.store
        .put_object(
            "outgoing-data",
            "contextualized/test/a/f0.jsonl.gz",
            vec![0u8; 10],
        )
        .await;

    assert!(h.service.reconcile_folder("test/a").await.unwrap());
    // Second run is a no-op on the completed folder.
    assert!(!h.service.reconcile_folder("test/a").await.unwrap());
    assert!(h.service.reconcile_folder("test/missing").await.is_err());
}
