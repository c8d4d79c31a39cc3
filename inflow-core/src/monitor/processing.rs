//! Processing monitor: after an upload is final, compares incoming file
//! counts against the processed outputs until they converge, editing the
//! folder's notification with progress along the way.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::notify::CompletionUpdate;
use crate::service::FolderWatchService;
use crate::stats;

pub(crate) async fn run(service: Arc<FolderWatchService>, folder: String, incoming_count: u64) {
    info!(folder, incoming_count, "starting processing monitoring");
    let result = watch_until_converged(&service, &folder, incoming_count).await;
    // The entry is removed on every exit path so the sweep can take over.
    service.registry().remove(&folder).await;
    if let Err(err) = result {
        error!(folder, error = %err, "processing monitor failed");
    }
}

async fn watch_until_converged(
    service: &Arc<FolderWatchService>,
    folder: &str,
    incoming_count: u64,
) -> Result<()> {
    let config = service.config();
    let output_folder = config.output_folder(folder);
    let mut first_check = true;
    loop {
        // The first comparison runs immediately; processing may already have
        // finished by the time the upload was finalized.
        if !first_check {
            tokio::time::sleep(config.processing_interval).await;
        }
        first_check = false;

        if !service.registry().contains(folder).await {
            info!(folder, "folder removed from processing monitoring");
            return Ok(());
        }

        let outgoing = stats::probe(
            service.store(),
            &config.outgoing_bucket,
            &output_folder,
            &config.data_suffix,
        )
        .await;
        let remaining = incoming_count as i64 - outgoing.file_count as i64;
        info!(
            folder,
            incoming_count,
            outgoing_count = outgoing.file_count,
            remaining,
            "processing progress check"
        );

        let record = service.gate().get(folder).await?;
        let (first_seen, total_size, message) = match &record {
            Some(record) => (
                record.first_seen_at.clone(),
                record.total_size_bytes,
                record.notification_ref.clone(),
            ),
            None => (String::new(), 0, None),
        };
        let update = CompletionUpdate {
            file_count: incoming_count,
            total_size_bytes: total_size,
            processing_remaining: Some(remaining),
            check_time: Some(Utc::now().to_rfc3339()),
        };
        if let Err(err) = service
            .notifier()
            .post_update(folder, &first_seen, &update, message.as_ref())
            .await
        {
            // Progress edits are cosmetic; keep watching.
            warn!(folder, error = %err, "failed to post progress update");
        }

        if remaining == 0 {
            let won = service.gate().complete_processing(folder).await?;
            if won {
                info!(folder, "processing complete, folder lifecycle finished");
                service.spawn_artifact_generation(folder);
            } else {
                info!(folder, "processing already completed elsewhere");
            }
            return Ok(());
        }
    }
}
