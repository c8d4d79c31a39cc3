//! Transactional gate over the durable metadata store.
//!
//! The three transition operations are the single source of truth for the
//! folder lifecycle. Each is atomic with respect to concurrent callers on
//! the same key: exactly one caller observes `true` per transition, and all
//! others observe `false` and must not duplicate side effects.

mod firestore;
mod memory;

pub use firestore::{FirestoreGate, FirestoreGateConfig};
pub use memory::MemoryGate;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::record::{FolderRecord, MessageRef, WorkQueueEntry};

/// Attempts for best-effort auxiliary writes (notification refs, stat
/// refreshes) before giving up with a logged warning.
const AUX_WRITE_ATTEMPTS: u32 = 3;
const AUX_WRITE_BACKOFF: Duration = Duration::from_millis(200);

#[async_trait]
pub trait MetadataGate: Send + Sync {
    /// Idempotently open a folder. Creates the record with `state=Open` and
    /// `generation=1` when absent and returns `true` (the caller owns the
    /// initial notification). Returns `false` for any existing record,
    /// except a `ProcessingComplete` one when reactivation is enabled, which
    /// advances to a fresh generation and returns `true`.
    async fn open(&self, folder: &str, first_seen: &str) -> Result<bool>;

    /// CAS `Open -> UploadFinal` for the current generation, storing the
    /// finalize-time stats and inserting the work-queue entry in the same
    /// atomic write. Returns `false` when the state already moved on.
    async fn finalize_upload(
        &self,
        folder: &str,
        file_count: u64,
        total_size_bytes: u64,
    ) -> Result<bool>;

    /// CAS `UploadFinal -> ProcessingComplete`, removing the work-queue
    /// entry. Returns `false` when another actor already completed it.
    async fn complete_processing(&self, folder: &str) -> Result<bool>;

    async fn get(&self, folder: &str) -> Result<Option<FolderRecord>>;

    /// Persist the editable message reference. Plain write, no precondition;
    /// callers go through [`save_notification_ref_best_effort`].
    async fn save_notification_ref(&self, folder: &str, message: &MessageRef) -> Result<()>;

    /// Overwrite stored stats with freshly recounted values. Used by the
    /// reconciliation path when the finalize-time snapshot went stale.
    async fn refresh_stats(
        &self,
        folder: &str,
        file_count: u64,
        total_size_bytes: u64,
    ) -> Result<()>;

    /// Bounded batch of folders awaiting processing completion.
    async fn pending_work(&self, limit: usize) -> Result<Vec<WorkQueueEntry>>;

    /// Bounded scan over folder records, for the analytics backfill.
    async fn list_records(&self, limit: usize) -> Result<Vec<FolderRecord>>;
}

/// Best-effort persist of the message reference with a short fixed backoff.
///
/// Losing this write only degrades later edits to "no further update"; it
/// must never surface as an error or block the notify path.
pub async fn save_notification_ref_best_effort(
    gate: &dyn MetadataGate,
    folder: &str,
    message: &MessageRef,
) {
    let mut last_err = None;
    for _ in 0..AUX_WRITE_ATTEMPTS {
        match gate.save_notification_ref(folder, message).await {
            Ok(()) => return,
            Err(err) => {
                last_err = Some(err);
                tokio::time::sleep(AUX_WRITE_BACKOFF).await;
            }
        }
    }
    if let Some(err) = last_err {
        warn!(
            folder,
            error = %err,
            "failed to save notification reference after {AUX_WRITE_ATTEMPTS} attempts"
        );
    }
}
