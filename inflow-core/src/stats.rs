//! Folder statistics: matching-file count and total byte size under a
//! prefix.

use std::sync::Arc;

use tracing::{debug, error};

use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Count and sum objects under `folder/` whose key ends with `suffix`.
///
/// Directory placeholders (keys ending in `/`) are skipped. Listing errors
/// degrade to zeros with an error log; callers treat that as "no data yet",
/// never as fatal.
pub async fn probe(
    store: &Arc<dyn ObjectStore>,
    bucket: &str,
    folder: &str,
    suffix: &str,
) -> FolderStats {
    let prefix = if folder.ends_with('/') {
        folder.to_string()
    } else {
        format!("{folder}/")
    };
    let listed = match store.list(bucket, &prefix).await {
        Ok(listed) => listed,
        Err(err) => {
            error!(bucket, folder, error = %err, "folder stats listing failed");
            return FolderStats::default();
        }
    };

    let mut stats = FolderStats::default();
    let scanned = listed.len();
    for object in listed {
        if object.name.ends_with('/') || !object.name.ends_with(suffix) {
            continue;
        }
        stats.file_count += 1;
        stats.total_bytes += object.size;
    }
    debug!(
        bucket,
        folder,
        scanned,
        matched = stats.file_count,
        total_bytes = stats.total_bytes,
        "folder stats listing complete"
    );
    stats
}
