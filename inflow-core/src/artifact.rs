//! Downstream artifact generation: per-folder vehicle/month summary built
//! from the processed outputs once a folder completes.
//!
//! Fire-and-forget. Every per-file and per-line fault is counted and logged;
//! nothing here propagates back to the completion path.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::record::doc_id;
use crate::settings::WatchConfig;
use crate::store::ObjectStore;

static DATE_IN_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2})-\d{2}").expect("date pattern"));

/// Pull the `YYYY-MM` month out of a `YYYY-MM-DD` date embedded in an object
/// key, if any.
fn month_from_path(key: &str) -> Option<String> {
    DATE_IN_PATH
        .captures(key)
        .map(|captures| captures[1].to_string())
}

/// Vehicle id from one output line: nested `input.vehicle` preferred, bare
/// `vehicle` as fallback.
fn vehicle_from_line(line: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(line).ok()?;
    let nested = parsed
        .get("input")
        .and_then(|input| input.get("vehicle"))
        .and_then(Value::as_str);
    nested
        .or_else(|| parsed.get("vehicle").and_then(Value::as_str))
        .map(str::to_string)
}

/// Scan the folder's processed outputs and accumulate vehicle -> months.
async fn collect_vehicle_months(
    store: &Arc<dyn ObjectStore>,
    config: &WatchConfig,
    folder: &str,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut vehicle_months: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let output_prefix = format!("{}/", config.output_folder(folder));
    let listed = match store.list(&config.outgoing_bucket, &output_prefix).await {
        Ok(listed) => listed,
        Err(err) => {
            warn!(folder, error = %err, "artifact listing failed");
            return vehicle_months;
        }
    };

    let mut files_processed = 0u64;
    let mut files_with_errors = 0u64;
    for object in listed {
        if !object.name.ends_with(config.data_suffix.as_str()) {
            continue;
        }
        let Some(month) = month_from_path(&object.name) else {
            debug!(key = %object.name, "no date in output path, skipping");
            continue;
        };
        let bytes = match store.read(&config.outgoing_bucket, &object.name).await {
            Ok(bytes) => bytes,
            Err(err) => {
                files_with_errors += 1;
                warn!(key = %object.name, error = %err, "failed to read output object");
                continue;
            }
        };
        let reader = BufReader::new(GzDecoder::new(bytes.as_slice()));
        for line in reader.lines() {
            let Ok(line) = line else {
                // Truncated or corrupt gzip stream; keep whatever parsed.
                files_with_errors += 1;
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(vehicle) = vehicle_from_line(&line) {
                vehicle_months.entry(vehicle).or_default().insert(month.clone());
            }
        }
        files_processed += 1;
    }
    info!(
        folder,
        files_processed,
        files_with_errors,
        vehicles = vehicle_months.len(),
        "artifact analysis complete"
    );
    vehicle_months
}

fn render_csv(vehicle_months: &BTreeMap<String, BTreeSet<String>>) -> String {
    let mut csv = String::from("vehicle_id,month_count\n");
    for (vehicle, months) in vehicle_months {
        csv.push_str(&format!("{vehicle},{}\n", months.len()));
    }
    csv
}

/// Generate and upload the per-folder summary CSV. No-op without an
/// analytics bucket.
pub async fn generate_vehicle_summary(
    store: &Arc<dyn ObjectStore>,
    config: &WatchConfig,
    folder: &str,
) {
    let Some(bucket) = config.analytics_bucket.as_deref().filter(|b| !b.is_empty()) else {
        warn!(folder, "analytics bucket not configured, skipping artifact generation");
        return;
    };
    info!(folder, "starting artifact generation");
    let vehicle_months = collect_vehicle_months(store, config, folder).await;
    if vehicle_months.is_empty() {
        debug!(folder, "no vehicle data found, skipping artifact upload");
        return;
    }
    let csv = render_csv(&vehicle_months);
    let key = format!("vehicle-analysis/{}_vehicle_analysis.csv", doc_id(folder));
    match store
        .write(bucket, &key, csv.into_bytes(), "text/csv", None)
        .await
    {
        Ok(_) => info!(folder, bucket, key, "uploaded artifact summary"),
        Err(err) => warn!(folder, error = %err, "failed to upload artifact summary"),
    }
}
