//! Upload monitor: polls a folder's listing until no new object has
//! appeared for the inactivity window, then drives the finalize transition.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::notify::CompletionUpdate;
use crate::service::FolderWatchService;
use crate::stats;

/// Entry point for the spawned task. Any error deregisters the folder so a
/// later event or the sweep can recover it; the process is never affected.
pub(crate) async fn run(service: Arc<FolderWatchService>, folder: String) {
    info!(folder, "starting upload monitoring");
    if let Err(err) = watch_until_final(&service, &folder).await {
        error!(folder, error = %err, "upload monitor failed");
        service.registry().remove(&folder).await;
    }
}

async fn watch_until_final(service: &Arc<FolderWatchService>, folder: &str) -> Result<()> {
    let config = service.config();
    let prefix = format!("{folder}/");
    loop {
        tokio::time::sleep(config.poll_interval).await;

        if !service.registry().contains(folder).await {
            info!(folder, "folder removed from upload monitoring");
            return Ok(());
        }

        // List and diff against the known-key set. A listing failure is
        // treated as "nothing new" and retried next tick.
        let keys = match service
            .store()
            .list(&config.incoming_bucket, &prefix)
            .await
        {
            Ok(listed) => listed.into_iter().map(|meta| meta.name).collect::<Vec<_>>(),
            Err(err) => {
                error!(folder, error = %err, "failed to list folder for new files");
                continue;
            }
        };
        match service.registry().absorb_listing(folder, &keys).await {
            None => {
                info!(folder, "folder removed from upload monitoring");
                return Ok(());
            }
            Some(true) => {
                debug!(folder, "new files found, continuing monitoring");
                continue;
            }
            Some(false) => {}
        }

        let Some(idle) = service.registry().idle_for(folder).await else {
            return Ok(());
        };
        if idle >= config.inactivity_timeout {
            info!(
                folder,
                idle_secs = idle.as_secs(),
                "no new files within inactivity window, finalizing upload"
            );
            finalize(service, folder).await?;
            return Ok(());
        }
    }
}

/// Finalize through the gate. The winner owns the notification and the
/// analytics row; either way a processing monitor must end up running.
async fn finalize(service: &Arc<FolderWatchService>, folder: &str) -> Result<()> {
    let config = service.config();
    let snapshot = stats::probe(
        service.store(),
        &config.incoming_bucket,
        folder,
        &config.data_suffix,
    )
    .await;

    let won = match service
        .gate()
        .finalize_upload(folder, snapshot.file_count, snapshot.total_bytes)
        .await
    {
        Ok(won) => won,
        Err(err) => {
            // Stand down: the record was not transitioned, so a concurrent
            // instance or the sweep will pick the folder up.
            error!(folder, error = %err, "finalize transition failed");
            false
        }
    };

    if won {
        let record = service.gate().get(folder).await?;
        let (first_seen, message) = match &record {
            Some(record) => (
                record.first_seen_at.clone(),
                record.notification_ref.clone(),
            ),
            None => (String::new(), None),
        };
        let update = CompletionUpdate {
            file_count: snapshot.file_count,
            total_size_bytes: snapshot.total_bytes,
            processing_remaining: None,
            check_time: Some(Utc::now().to_rfc3339()),
        };
        if let Err(err) = service
            .notifier()
            .post_update(folder, &first_seen, &update, message.as_ref())
            .await
        {
            error!(folder, error = %err, "failed to send upload-final notification");
        }
        service.spawn_completion_row(folder, &first_seen, snapshot);
        service.start_processing_monitor(folder, snapshot.file_count).await;
    } else {
        // Another instance finalized first; still make sure processing is
        // watched locally, using the stored count.
        let stored_count = match service.gate().get(folder).await? {
            Some(record) => record.file_count,
            None => snapshot.file_count,
        };
        info!(folder, "upload already finalized elsewhere, ensuring processing monitor");
        service.start_processing_monitor(folder, stored_count).await;
    }

    info!(folder, "stopped upload monitoring, processing monitoring continues");
    Ok(())
}
