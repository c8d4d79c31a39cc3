//! Human-facing byte and time formatting used in notification bodies.

use chrono::{DateTime, Duration, FixedOffset, Timelike};

/// Format a byte count as `B`/`KB`/`MB`/`GB`/`TB`/`PB` with two decimals.
pub fn human_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// Round an ISO-8601 timestamp string to the nearest second.
///
/// `Z` suffixes survive the round trip. Inputs that fail to parse (including
/// the literal `"Unknown"`) are passed through untouched so callers can show
/// whatever the event carried.
pub fn round_to_second(iso_timestamp: &str) -> String {
    if iso_timestamp.is_empty() || iso_timestamp == "Unknown" {
        return iso_timestamp.to_string();
    }
    let cleaned = iso_timestamp.replace('Z', "+00:00");
    let Ok(parsed) = DateTime::<FixedOffset>::parse_from_rfc3339(&cleaned) else {
        return iso_timestamp.to_string();
    };
    let rounded = if parsed.nanosecond() >= 500_000_000 {
        parsed.with_nanosecond(0).unwrap_or(parsed) + Duration::seconds(1)
    } else {
        parsed.with_nanosecond(0).unwrap_or(parsed)
    };
    let mut out = rounded.to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
    if out.ends_with("+00:00") {
        out.truncate(out.len() - "+00:00".len());
        out.push('Z');
    }
    out
}

/// Human-readable gap between two ISO-8601 timestamps, or `"Unknown"` when
/// either side is missing or unparseable.
pub fn format_duration_between(first: &str, last: &str) -> String {
    if first.is_empty() || first == "Unknown" || last.is_empty() {
        return "Unknown".to_string();
    }
    let first_clean = first.replace('Z', "+00:00");
    let last_clean = last.replace('Z', "+00:00");
    let (Ok(first_dt), Ok(last_dt)) = (
        DateTime::<FixedOffset>::parse_from_rfc3339(&first_clean),
        DateTime::<FixedOffset>::parse_from_rfc3339(&last_clean),
    ) else {
        return "Unknown".to_string();
    };

    let total_seconds = (last_dt - first_dt).num_seconds();
    if total_seconds < 0 {
        return "Unknown".to_string();
    }
    if total_seconds < 60 {
        format!("{total_seconds}s")
    } else if total_seconds < 3600 {
        format!("{}m {}s", total_seconds / 60, total_seconds % 60)
    } else if total_seconds < 86400 {
        format!("{}h {}m", total_seconds / 3600, (total_seconds % 3600) / 60)
    } else {
        format!(
            "{}d {}h",
            total_seconds / 86400,
            (total_seconds % 86400) / 3600
        )
    }
}
