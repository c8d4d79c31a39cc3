//! Durable folder lifecycle records and the work queue entry shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a folder within one generation.
///
/// Transitions are strictly `Open -> UploadFinal -> ProcessingComplete`,
/// with an optional reset back to `Open` on reactivation (which advances the
/// generation). The state never regresses within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderState {
    Open,
    UploadFinal,
    ProcessingComplete,
}

/// One row per logical folder in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub folder_path: String,
    pub state: FolderState,
    /// Timestamp of the event that opened the folder; immutable once set.
    pub first_seen_at: String,
    /// Set once, when upload inactivity was confirmed.
    #[serde(default)]
    pub upload_final_at: Option<DateTime<Utc>>,
    /// Snapshot at finalize time; refreshed by reconciliation when stale.
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub total_size_bytes: u64,
    /// Handle for editing the posted message; `None` when only the webhook
    /// fallback was available.
    #[serde(default)]
    pub notification_ref: Option<MessageRef>,
    /// Incremented on legitimate reopening after completion.
    #[serde(default = "default_generation")]
    pub generation: u32,
    /// Number of `ProcessingComplete -> Open` resets this folder has seen.
    #[serde(default)]
    pub reactivation_count: u32,
}

fn default_generation() -> u32 {
    1
}

impl FolderRecord {
    pub fn opened(folder_path: &str, first_seen_at: &str) -> Self {
        Self {
            folder_path: folder_path.to_string(),
            state: FolderState::Open,
            first_seen_at: first_seen_at.to_string(),
            upload_final_at: None,
            file_count: 0,
            total_size_bytes: 0,
            notification_ref: None,
            generation: 1,
            reactivation_count: 0,
        }
    }

    /// Reset for a new upload cycle, preserving identity and history.
    pub fn reactivate(&mut self, first_seen_at: &str) {
        self.state = FolderState::Open;
        self.first_seen_at = first_seen_at.to_string();
        self.upload_final_at = None;
        self.file_count = 0;
        self.total_size_bytes = 0;
        self.notification_ref = None;
        self.generation += 1;
        self.reactivation_count += 1;
    }
}

/// Editable reference to a posted notification (channel + message id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: String,
    pub ts: String,
}

/// Present in the work-queue collection iff the folder reached `UploadFinal`
/// but not yet `ProcessingComplete`. Existence is the sole "needs checking"
/// signal, so the reconciliation sweep never scans the full record set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkQueueEntry {
    pub folder_path: String,
    pub file_count: u64,
    pub total_size_bytes: u64,
    pub enqueued_at: DateTime<Utc>,
}

/// Filesystem-safe document key for a folder path.
///
/// Path separators are replaced so the path can serve as a single document
/// id in the metadata store.
pub fn doc_id(folder_path: &str) -> String {
    folder_path.replace(['/', '\\'], "_")
}
