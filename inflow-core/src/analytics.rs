//! Best-effort completion analytics: one CSV row per finished folder,
//! appended to a single bucket object with optimistic concurrency.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::store::ObjectStore;

const APPEND_ATTEMPTS: u32 = 3;
const APPEND_BACKOFF: Duration = Duration::from_millis(200);
const CSV_HEADER: &str =
    "folder_path,first_notification_time,final_notification_time,file_count,total_size_bytes\n";

/// A completed folder's analytics row.
#[derive(Debug, Clone)]
pub struct CompletionRow {
    pub folder_path: String,
    pub first_notification_time: String,
    pub final_notification_time: String,
    pub file_count: u64,
    pub total_size_bytes: u64,
}

impl CompletionRow {
    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{}\n",
            csv_field(&self.folder_path),
            csv_field(&self.first_notification_time),
            csv_field(&self.final_notification_time),
            self.file_count,
            self.total_size_bytes
        )
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Append a completion row. The object is created with a header when absent;
/// otherwise the append is a read-modify-write guarded by the object
/// generation, retried a few times on conflict. All failures are logged and
/// swallowed: analytics never block or fail the completion path.
pub async fn append_completion_row(
    store: &Arc<dyn ObjectStore>,
    bucket: &str,
    object: &str,
    row: &CompletionRow,
) {
    let row_bytes = row.to_csv();
    for attempt in 1..=APPEND_ATTEMPTS {
        let current = match store.read_with_generation(bucket, object).await {
            Ok(current) => current,
            Err(err) => {
                error!(
                    folder = %row.folder_path,
                    bucket,
                    object,
                    error = %err,
                    "failed to read analytics object"
                );
                return;
            }
        };
        let (data, precondition) = match &current {
            None => (format!("{CSV_HEADER}{row_bytes}"), Some(0)),
            Some((existing, generation)) => {
                let mut data = String::from_utf8_lossy(existing).into_owned();
                data.push_str(&row_bytes);
                (data, Some(*generation))
            }
        };
        match store
            .write(bucket, object, data.into_bytes(), "text/csv", precondition)
            .await
        {
            Ok(true) => {
                info!(folder = %row.folder_path, bucket, object, "appended analytics row");
                return;
            }
            Ok(false) => {
                debug!(
                    folder = %row.folder_path,
                    attempt,
                    "analytics append lost a generation race, retrying"
                );
                tokio::time::sleep(APPEND_BACKOFF).await;
            }
            Err(err) => {
                error!(
                    folder = %row.folder_path,
                    bucket,
                    object,
                    error = %err,
                    "failed to write analytics object"
                );
                return;
            }
        }
    }
    error!(
        folder = %row.folder_path,
        "failed to append analytics row after {APPEND_ATTEMPTS} attempts"
    );
}
