//! In-memory gate used by tests and single-instance local runs.
//!
//! All operations run under one async mutex, which gives the same
//! one-winner-per-transition guarantee the durable store provides through
//! conditional writes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::record::{doc_id, FolderRecord, FolderState, MessageRef, WorkQueueEntry};

use super::MetadataGate;

#[derive(Debug, Default)]
struct Collections {
    records: HashMap<String, FolderRecord>,
    work_queue: HashMap<String, WorkQueueEntry>,
}

#[derive(Debug)]
pub struct MemoryGate {
    inner: Mutex<Collections>,
    allow_reactivation: bool,
}

impl MemoryGate {
    pub fn new(allow_reactivation: bool) -> Self {
        Self {
            inner: Mutex::new(Collections::default()),
            allow_reactivation,
        }
    }

    /// Seed a record directly, bypassing the lifecycle. Test setup only.
    pub async fn seed_record(&self, record: FolderRecord) {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .insert(doc_id(&record.folder_path), record);
    }

    /// Seed a work-queue entry directly. Test setup only.
    pub async fn seed_work(&self, entry: WorkQueueEntry) {
        let mut inner = self.inner.lock().await;
        inner
            .work_queue
            .insert(doc_id(&entry.folder_path), entry);
    }

    pub async fn work_queue_len(&self) -> usize {
        self.inner.lock().await.work_queue.len()
    }
}

impl Default for MemoryGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl MetadataGate for MemoryGate {
    async fn open(&self, folder: &str, first_seen: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = doc_id(folder);
        match inner.records.get_mut(&key) {
            None => {
                inner
                    .records
                    .insert(key, FolderRecord::opened(folder, first_seen));
                Ok(true)
            }
            Some(record) => {
                if self.allow_reactivation && record.state == FolderState::ProcessingComplete {
                    record.reactivate(first_seen);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    async fn finalize_upload(
        &self,
        folder: &str,
        file_count: u64,
        total_size_bytes: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = doc_id(folder);
        let Some(record) = inner.records.get_mut(&key) else {
            return Ok(false);
        };
        if record.state != FolderState::Open {
            return Ok(false);
        }
        record.state = FolderState::UploadFinal;
        record.upload_final_at = Some(Utc::now());
        record.file_count = file_count;
        record.total_size_bytes = total_size_bytes;
        inner.work_queue.insert(
            key,
            WorkQueueEntry {
                folder_path: folder.to_string(),
                file_count,
                total_size_bytes,
                enqueued_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn complete_processing(&self, folder: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = doc_id(folder);
        let Some(record) = inner.records.get_mut(&key) else {
            return Ok(false);
        };
        if record.state != FolderState::UploadFinal {
            return Ok(false);
        }
        record.state = FolderState::ProcessingComplete;
        inner.work_queue.remove(&key);
        Ok(true)
    }

    async fn get(&self, folder: &str) -> Result<Option<FolderRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&doc_id(folder)).cloned())
    }

    async fn save_notification_ref(&self, folder: &str, message: &MessageRef) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.records.get_mut(&doc_id(folder)) {
            record.notification_ref = Some(message.clone());
        }
        Ok(())
    }

    async fn refresh_stats(
        &self,
        folder: &str,
        file_count: u64,
        total_size_bytes: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.records.get_mut(&doc_id(folder)) {
            record.file_count = file_count;
            record.total_size_bytes = total_size_bytes;
        }
        Ok(())
    }

    async fn pending_work(&self, limit: usize) -> Result<Vec<WorkQueueEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<WorkQueueEntry> =
            inner.work_queue.values().cloned().collect();
        entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<FolderRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<FolderRecord> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| a.folder_path.cmp(&b.folder_path));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn open_is_first_writer_wins() {
        let gate = MemoryGate::default();
        assert!(gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap());
        assert!(!gate.open("test/a", "2026-01-01T00:00:05Z").await.unwrap());

        let record = gate.get("test/a").await.unwrap().unwrap();
        // First-seen is immutable once set.
        assert_eq!(record.first_seen_at, "2026-01-01T00:00:00Z");
        assert_eq!(record.generation, 1);
    }

    #[tokio::test]
    async fn open_under_duplicated_concurrent_delivery_has_one_winner() {
        let gate = Arc::new(MemoryGate::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.open("test/race", "2026-01-01T00:00:00Z").await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn finalize_has_exactly_one_winner() {
        let gate = Arc::new(MemoryGate::default());
        gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(
                async move { gate.finalize_upload("test/a", 10, 1000).await.unwrap() },
            ));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(gate.work_queue_len().await, 1);
    }

    #[tokio::test]
    async fn finalize_without_open_record_stands_down() {
        let gate = MemoryGate::default();
        assert!(!gate.finalize_upload("test/missing", 1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn complete_processing_is_idempotent() {
        let gate = MemoryGate::default();
        gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap();
        gate.finalize_upload("test/a", 10, 1000).await.unwrap();

        assert!(gate.complete_processing("test/a").await.unwrap());
        assert!(!gate.complete_processing("test/a").await.unwrap());
        assert_eq!(gate.work_queue_len().await, 0);
    }

    #[tokio::test]
    async fn work_queue_entry_exists_iff_upload_final() {
        let gate = MemoryGate::default();
        gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap();
        assert_eq!(gate.work_queue_len().await, 0);

        gate.finalize_upload("test/a", 3, 30).await.unwrap();
        assert_eq!(gate.work_queue_len().await, 1);
        let pending = gate.pending_work(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].folder_path, "test/a");
        assert_eq!(pending[0].file_count, 3);

        gate.complete_processing("test/a").await.unwrap();
        assert_eq!(gate.work_queue_len().await, 0);
    }

    #[tokio::test]
    async fn pending_work_is_bounded() {
        let gate = MemoryGate::default();
        for i in 0..5 {
            let folder = format!("test/f{i}");
            gate.open(&folder, "2026-01-01T00:00:00Z").await.unwrap();
            gate.finalize_upload(&folder, 1, 1).await.unwrap();
        }
        assert_eq!(gate.pending_work(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn completed_folder_swallows_events_without_reactivation() {
        let gate = MemoryGate::new(false);
        gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap();
        gate.finalize_upload("test/a", 1, 1).await.unwrap();
        gate.complete_processing("test/a").await.unwrap();

        assert!(!gate.open("test/a", "2026-02-01T00:00:00Z").await.unwrap());
        let record = gate.get("test/a").await.unwrap().unwrap();
        assert_eq!(record.generation, 1);
    }

    #[tokio::test]
    async fn reactivation_opens_a_new_generation() {
        let gate = MemoryGate::new(true);
        gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap();
        gate.finalize_upload("test/a", 1, 1).await.unwrap();
        gate.complete_processing("test/a").await.unwrap();

        assert!(gate.open("test/a", "2026-02-01T00:00:00Z").await.unwrap());
        let record = gate.get("test/a").await.unwrap().unwrap();
        assert_eq!(record.state, FolderState::Open);
        assert_eq!(record.generation, 2);
        assert_eq!(record.reactivation_count, 1);
        // But an open folder still cannot reactivate mid-cycle.
        assert!(!gate.open("test/a", "2026-02-01T00:01:00Z").await.unwrap());
    }

    #[tokio::test]
    async fn notification_ref_and_stats_are_plain_updates() {
        let gate = MemoryGate::default();
        gate.open("test/a", "2026-01-01T00:00:00Z").await.unwrap();
        gate.save_notification_ref(
            "test/a",
            &MessageRef {
                channel: "C1".into(),
                ts: "1.2".into(),
            },
        )
        .await
        .unwrap();
        gate.refresh_stats("test/a", 42, 4200).await.unwrap();

        let record = gate.get("test/a").await.unwrap().unwrap();
        assert_eq!(record.notification_ref.unwrap().ts, "1.2");
        assert_eq!(record.file_count, 42);
        assert_eq!(record.total_size_bytes, 4200);
    }
}
