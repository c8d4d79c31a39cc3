//! Reconciliation sweep over the durable work queue.
//!
//! Monitors are process-local and die with the process; the work queue does
//! not. The sweep periodically re-derives completion for queued folders no
//! local monitor owns, so a crash between finalize and completion only delays
//! the final notification instead of losing it.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::notify::CompletionUpdate;
use crate::record::WorkQueueEntry;
use crate::service::FolderWatchService;
use crate::stats;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries examined this pass.
    pub checked: usize,
    /// Entries skipped because a live local monitor owns them.
    pub skipped_live: usize,
    /// Folders driven to completion this pass.
    pub completed: usize,
}

/// Run sweeps forever at the configured interval, until cancelled.
pub async fn run_periodic(service: Arc<FolderWatchService>, shutdown: CancellationToken) {
    let interval = service.config().sweep_interval;
    info!(interval_secs = interval.as_secs(), "reconciliation sweep started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("reconciliation sweep stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
        let report = run_once(&service).await;
        info!(
            checked = report.checked,
            skipped_live = report.skipped_live,
            completed = report.completed,
            "reconciliation sweep pass finished"
        );
    }
}

/// One sweep pass: examine a bounded batch of pending work and complete
/// whatever has converged. Per-folder failures are logged and skipped; they
/// never abort the pass.
pub async fn run_once(service: &Arc<FolderWatchService>) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match service
        .gate()
        .pending_work(service.config().sweep_batch_limit)
        .await
    {
        Ok(entries) => entries,
        Err(err) => {
            error!(error = %err, "failed to list pending work");
            return report;
        }
    };

    for entry in entries {
        if service.registry().contains(&entry.folder_path).await {
            report.skipped_live += 1;
            continue;
        }
        report.checked += 1;
        match reconcile_entry(service, &entry).await {
            Ok(true) => report.completed += 1,
            Ok(false) => {}
            Err(err) => {
                error!(folder = %entry.folder_path, error = %err, "reconciliation failed");
            }
        }
    }
    report
}

/// Re-derive one queued folder's status from the buckets. Returns `true`
/// when this call completed the folder.
pub async fn reconcile_entry(
    service: &Arc<FolderWatchService>,
    entry: &WorkQueueEntry,
) -> Result<bool> {
    let config = service.config();
    let folder = entry.folder_path.as_str();

    let incoming = stats::probe(
        service.store(),
        &config.incoming_bucket,
        folder,
        &config.data_suffix,
    )
    .await;
    if incoming.file_count == 0 {
        warn!(folder, "no incoming files found during reconciliation, leaving queued");
        return Ok(false);
    }
    let outgoing = stats::probe(
        service.store(),
        &config.outgoing_bucket,
        &config.output_folder(folder),
        &config.data_suffix,
    )
    .await;
    let remaining = incoming.file_count as i64 - outgoing.file_count as i64;
    if remaining != 0 {
        info!(folder, remaining, "reconciliation found processing still in progress");
        return Ok(false);
    }

    // Counts converged. Recount sizes in case the queue entry's snapshot is
    // stale (files kept arriving after finalize).
    if incoming.file_count != entry.file_count || incoming.total_bytes != entry.total_size_bytes {
        if let Err(err) = service
            .gate()
            .refresh_stats(folder, incoming.file_count, incoming.total_bytes)
            .await
        {
            warn!(folder, error = %err, "failed to refresh folder stats");
        }
    }

    let record = service.gate().get(folder).await?;
    let (first_seen, message) = match &record {
        Some(record) => (
            record.first_seen_at.clone(),
            record.notification_ref.clone(),
        ),
        None => (String::new(), None),
    };
    let update = CompletionUpdate {
        file_count: incoming.file_count,
        total_size_bytes: incoming.total_bytes,
        processing_remaining: Some(0),
        check_time: Some(Utc::now().to_rfc3339()),
    };
    // A transport failure defers completion to the next sweep so the final
    // notification is not silently lost. `Ok(false)` means no mechanism is
    // configured at all; waiting would never help, so complete anyway.
    match service
        .notifier()
        .post_update(folder, &first_seen, &update, message.as_ref())
        .await
    {
        Ok(_) => {}
        Err(err) => {
            error!(folder, error = %err, "final notification failed, deferring completion");
            return Ok(false);
        }
    }

    let won = service.gate().complete_processing(folder).await?;
    if won {
        info!(folder, "reconciliation completed folder");
        service.spawn_artifact_generation(folder);
    }
    Ok(won)
}
