//! The watch service facade: event intake, monitor lifecycle, and the
//! background jobs that hang off completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::analytics::{self, CompletionRow};
use crate::artifact;
use crate::classify::classify;
use crate::error::{InflowError, Result};
use crate::format::round_to_second;
use crate::gate::{save_notification_ref_best_effort, MetadataGate};
use crate::monitor;
use crate::notify::Notifier;
use crate::record::{FolderState, WorkQueueEntry};
use crate::registry::FolderRegistry;
use crate::settings::WatchConfig;
use crate::stats::FolderStats;
use crate::store::ObjectStore;
use crate::sweep::{self, SweepReport};

/// A storage object-creation notification, already unwrapped from whatever
/// transport envelope delivered it.
#[derive(Debug, Clone)]
pub struct ObjectCreatedEvent {
    pub bucket: String,
    pub name: String,
    /// Creation timestamp as carried by the event, ISO-8601.
    pub time_created: String,
}

/// Ties the ports together and owns the per-folder monitor lifecycle.
///
/// All methods are safe under concurrent and duplicated delivery: the gate's
/// compare-and-set transitions decide winners, the registry only dedupes
/// local task creation.
pub struct FolderWatchService {
    config: WatchConfig,
    gate: Arc<dyn MetadataGate>,
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<FolderRegistry>,
}

impl FolderWatchService {
    pub fn new(
        config: WatchConfig,
        gate: Arc<dyn MetadataGate>,
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gate,
            store,
            notifier,
            registry: Arc::new(FolderRegistry::new()),
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub(crate) fn gate(&self) -> &Arc<dyn MetadataGate> {
        &self.gate
    }

    pub(crate) fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub(crate) fn registry(&self) -> &Arc<FolderRegistry> {
        &self.registry
    }

    /// Number of folders with a live local monitor. Health reporting only.
    pub async fn watched_folders(&self) -> usize {
        self.registry.watched_count().await
    }

    /// Entry point for every object-creation event.
    ///
    /// First event for a folder opens its record and posts the initial
    /// notification; any later event just feeds the debounce clock or, after
    /// a crash, restarts the appropriate monitor.
    pub async fn handle_object_created(
        self: &Arc<Self>,
        event: &ObjectCreatedEvent,
    ) -> Result<()> {
        if event.bucket != self.config.incoming_bucket {
            debug!(bucket = %event.bucket, "event from unwatched bucket, ignoring");
            return Ok(());
        }
        let Some(folder) = classify(&event.name, &self.config.monitored_prefixes) else {
            debug!(key = %event.name, "object outside monitored prefixes, ignoring");
            return Ok(());
        };
        let first_seen = round_to_second(&event.time_created);
        debug!(folder, key = %event.name, "object created");

        if self.gate.open(&folder, &first_seen).await? {
            info!(folder, "new folder opened");
            self.announce_and_watch(&folder, &event.name, &first_seen)
                .await;
        } else if self.registry.touch(&folder, &event.name).await {
            debug!(folder, "activity recorded for watched folder");
        } else {
            self.resume(&folder, &event.name).await?;
        }
        Ok(())
    }

    /// Winner-of-open path: post the initial message, persist its reference,
    /// start watching.
    async fn announce_and_watch(self: &Arc<Self>, folder: &str, key: &str, first_seen: &str) {
        match self.notifier.post_initial(folder, first_seen).await {
            Ok(Some(message)) => {
                save_notification_ref_best_effort(self.gate.as_ref(), folder, &message).await;
            }
            Ok(None) => {}
            Err(err) => {
                // The folder still gets monitored; only the message is lost.
                error!(folder, error = %err, "initial notification failed");
            }
        }
        if self.registry.begin_watch(folder, key).await {
            self.spawn_upload_monitor(folder);
        }
    }

    /// The record exists but no local monitor does. Restart whichever phase
    /// the durable state says the folder is in.
    async fn resume(self: &Arc<Self>, folder: &str, key: &str) -> Result<()> {
        let Some(record) = self.gate.get(folder).await? else {
            warn!(folder, "open refused but no record found, ignoring event");
            return Ok(());
        };
        match record.state {
            FolderState::Open => {
                if self.registry.begin_watch(folder, key).await {
                    info!(folder, "resuming upload monitoring for open folder");
                    self.spawn_upload_monitor(folder);
                }
            }
            FolderState::UploadFinal => {
                info!(folder, "late event for finalized folder, ensuring processing monitor");
                self.start_processing_monitor(folder, record.file_count)
                    .await;
            }
            FolderState::ProcessingComplete => {
                debug!(folder, "event for completed folder ignored");
            }
        }
        Ok(())
    }

    fn spawn_upload_monitor(self: &Arc<Self>, folder: &str) {
        tokio::spawn(monitor::upload::run(Arc::clone(self), folder.to_string()));
    }

    /// Spawn the processing monitor unless one already owns the folder.
    pub(crate) async fn start_processing_monitor(
        self: &Arc<Self>,
        folder: &str,
        incoming_count: u64,
    ) {
        if self.registry.claim_processing(folder, incoming_count).await {
            tokio::spawn(monitor::processing::run(
                Arc::clone(self),
                folder.to_string(),
                incoming_count,
            ));
        }
    }

    /// Fire-and-forget analytics row for a finalized upload.
    pub(crate) fn spawn_completion_row(
        self: &Arc<Self>,
        folder: &str,
        first_seen: &str,
        snapshot: FolderStats,
    ) {
        let Some((bucket, object)) = self.config.analytics_sink() else {
            return;
        };
        let (bucket, object) = (bucket.to_string(), object.to_string());
        let row = CompletionRow {
            folder_path: folder.to_string(),
            first_notification_time: first_seen.to_string(),
            final_notification_time: Utc::now().to_rfc3339(),
            file_count: snapshot.file_count,
            total_size_bytes: snapshot.total_bytes,
        };
        let service = Arc::clone(self);
        tokio::spawn(async move {
            analytics::append_completion_row(service.store(), &bucket, &object, &row).await;
        });
    }

    /// Fire-and-forget downstream artifact for a completed folder.
    pub(crate) fn spawn_artifact_generation(self: &Arc<Self>, folder: &str) {
        let service = Arc::clone(self);
        let folder = folder.to_string();
        tokio::spawn(async move {
            artifact::generate_vehicle_summary(service.store(), service.config(), &folder).await;
        });
    }

    /// One reconciliation sweep pass over the pending work queue.
    pub async fn run_sweep_once(self: &Arc<Self>) -> SweepReport {
        sweep::run_once(self).await
    }

    /// Reconcile a single named folder on demand. Returns `true` when the
    /// call drove it to completion.
    pub async fn reconcile_folder(self: &Arc<Self>, folder: &str) -> Result<bool> {
        let Some(record) = self.gate.get(folder).await? else {
            return Err(InflowError::Internal(format!(
                "no record for folder {folder}"
            )));
        };
        match record.state {
            FolderState::Open => {
                info!(folder, "folder still uploading, nothing to reconcile");
                Ok(false)
            }
            FolderState::ProcessingComplete => {
                info!(folder, "folder already complete");
                Ok(false)
            }
            FolderState::UploadFinal => {
                let entry = WorkQueueEntry {
                    folder_path: folder.to_string(),
                    file_count: record.file_count,
                    total_size_bytes: record.total_size_bytes,
                    enqueued_at: record.upload_final_at.unwrap_or_else(Utc::now),
                };
                sweep::reconcile_entry(self, &entry).await
            }
        }
    }

    /// Re-derive analytics rows for completed folders whose first-seen time
    /// falls in `[start, end)`. Returns the number of rows appended (or that
    /// would be appended, under `dry_run`).
    pub async fn backfill_analytics(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        dry_run: bool,
    ) -> Result<usize> {
        let Some((bucket, object)) = self.config.analytics_sink() else {
            return Err(InflowError::Internal(
                "analytics sink not configured".to_string(),
            ));
        };
        let (bucket, object) = (bucket.to_string(), object.to_string());

        let records = self.gate.list_records(limit).await?;
        let mut appended = 0usize;
        for record in records {
            if record.state != FolderState::ProcessingComplete || record.file_count == 0 {
                continue;
            }
            let Ok(first_seen) = DateTime::parse_from_rfc3339(&record.first_seen_at) else {
                warn!(folder = %record.folder_path, "unparseable first-seen time, skipping");
                continue;
            };
            let first_seen = first_seen.with_timezone(&Utc);
            if first_seen < start {
                continue;
            }
            if let Some(end) = end {
                if first_seen >= end {
                    continue;
                }
            }
            appended += 1;
            if dry_run {
                info!(folder = %record.folder_path, "would append analytics row");
                continue;
            }
            let row = CompletionRow {
                folder_path: record.folder_path.clone(),
                first_notification_time: record.first_seen_at.clone(),
                final_notification_time: record
                    .upload_final_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                file_count: record.file_count,
                total_size_bytes: record.total_size_bytes,
            };
            analytics::append_completion_row(&self.store, &bucket, &object, &row).await;
        }
        info!(appended, dry_run, "analytics backfill finished");
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MemoryGate;
    use crate::record::FolderRecord;
    use crate::store::MemoryObjectStore;
    use crate::testsupport::RecordingNotifier;

    fn event(key: &str) -> ObjectCreatedEvent {
        ObjectCreatedEvent {
            bucket: "incoming-data".to_string(),
            name: key.to_string(),
            time_created: "2026-01-05T10:00:00.400Z".to_string(),
        }
    }

    fn config() -> WatchConfig {
        WatchConfig {
            monitored_prefixes: vec!["test/".to_string()],
            ..WatchConfig::default()
        }
    }

    fn service(
        gate: Arc<MemoryGate>,
        notifier: Arc<RecordingNotifier>,
    ) -> Arc<FolderWatchService> {
        FolderWatchService::new(
            config(),
            gate,
            Arc::new(MemoryObjectStore::new()),
            notifier,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_event_opens_record_and_posts_once() {
        let gate = Arc::new(MemoryGate::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(gate.clone(), notifier.clone());

        service
            .handle_object_created(&event("test/a/f1.jsonl.gz"))
            .await
            .unwrap();
        service
            .handle_object_created(&event("test/a/f2.jsonl.gz"))
            .await
            .unwrap();

        assert_eq!(notifier.initial_posts(), vec!["test/a".to_string()]);
        let record = gate.get("test/a").await.unwrap().unwrap();
        assert_eq!(record.state, FolderState::Open);
        // Event time is rounded and stored with the Z suffix.
        assert_eq!(record.first_seen_at, "2026-01-05T10:00:00Z");
        assert!(record.notification_ref.is_some());
        assert!(service.registry().contains("test/a").await);
    }

    #[tokio::test]
    async fn unmonitored_and_foreign_bucket_events_are_ignored() {
        let gate = Arc::new(MemoryGate::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(gate.clone(), notifier.clone());

        service
            .handle_object_created(&event("elsewhere/f1.jsonl.gz"))
            .await
            .unwrap();
        let mut foreign = event("test/a/f1.jsonl.gz");
        foreign.bucket = "some-other-bucket".to_string();
        service.handle_object_created(&foreign).await.unwrap();

        assert!(notifier.initial_posts().is_empty());
        assert!(gate.get("test/a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn event_for_completed_folder_is_swallowed() {
        let gate = Arc::new(MemoryGate::default());
        let mut record = FolderRecord::opened("test/a", "2026-01-01T00:00:00Z");
        record.state = FolderState::ProcessingComplete;
        gate.seed_record(record).await;

        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(gate.clone(), notifier.clone());
        service
            .handle_object_created(&event("test/a/late.jsonl.gz"))
            .await
            .unwrap();

        assert!(notifier.initial_posts().is_empty());
        assert!(!service.registry().contains("test/a").await);
        let record = gate.get("test/a").await.unwrap().unwrap();
        assert_eq!(record.generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn event_for_finalized_folder_claims_processing_monitor() {
        let gate = Arc::new(MemoryGate::default());
        let mut record = FolderRecord::opened("test/a", "2026-01-01T00:00:00Z");
        record.state = FolderState::UploadFinal;
        record.file_count = 5;
        gate.seed_record(record).await;

        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(gate.clone(), notifier.clone());
        service
            .handle_object_created(&event("test/a/late.jsonl.gz"))
            .await
            .unwrap();

        assert!(service.registry().has_processing("test/a").await);
    }

    #[tokio::test]
    async fn backfill_filters_by_window_and_state() {
        let gate = Arc::new(MemoryGate::default());
        for (folder, first_seen, state) in [
            ("test/done", "2026-01-10T00:00:00Z", FolderState::ProcessingComplete),
            ("test/early", "2025-12-01T00:00:00Z", FolderState::ProcessingComplete),
            ("test/open", "2026-01-10T00:00:00Z", FolderState::Open),
        ] {
            let mut record = FolderRecord::opened(folder, first_seen);
            record.state = state;
            record.file_count = 2;
            record.total_size_bytes = 20;
            record.upload_final_at = Some(Utc::now());
            gate.seed_record(record).await;
        }

        let notifier = Arc::new(RecordingNotifier::new());
        let service = FolderWatchService::new(
            WatchConfig {
                monitored_prefixes: vec!["test/".to_string()],
                analytics_bucket: Some("analytics".into()),
                analytics_object: Some("completions.csv".into()),
                ..WatchConfig::default()
            },
            gate,
            Arc::new(MemoryObjectStore::new()),
            notifier,
        );

        let start = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let appended = service
            .backfill_analytics(start, None, 100, false)
            .await
            .unwrap();
        assert_eq!(appended, 1);

        let body = service
            .store()
            .read("analytics", "completions.csv")
            .await
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("test/done,"));
        assert!(!text.contains("test/early"));
        assert!(!text.contains("test/open"));
    }
}
