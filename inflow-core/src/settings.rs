//! Tuning knobs for the folder watch pipeline.

use std::time::Duration;

/// All timing and addressing parameters for the watch service. Defaults
/// mirror the reference deployment: 15s upload polls, 60s inactivity window,
/// 60s processing checks, 10-minute reconciliation sweeps.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Bucket receiving raw uploads.
    pub incoming_bucket: String,
    /// Bucket where the downstream processor writes its outputs.
    pub outgoing_bucket: String,
    /// Normalized monitored prefixes (each ends with `/`).
    pub monitored_prefixes: Vec<String>,
    /// Suffix of the files that count toward folder statistics.
    pub data_suffix: String,
    /// Prefix prepended to a folder path to derive its output location.
    pub output_prefix: String,
    /// How often an upload monitor re-lists its folder.
    pub poll_interval: Duration,
    /// Quiet period after which an upload is considered final.
    pub inactivity_timeout: Duration,
    /// How often a processing monitor compares incoming vs outgoing counts.
    pub processing_interval: Duration,
    /// How often the reconciliation sweep scans the work queue.
    pub sweep_interval: Duration,
    /// Max work-queue entries examined per sweep.
    pub sweep_batch_limit: usize,
    /// Whether a completed folder may reopen on a late event.
    pub allow_reactivation: bool,
    /// Optional analytics CSV sink.
    pub analytics_bucket: Option<String>,
    pub analytics_object: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            incoming_bucket: "incoming-data".to_string(),
            outgoing_bucket: "outgoing-data".to_string(),
            monitored_prefixes: Vec::new(),
            data_suffix: ".jsonl.gz".to_string(),
            output_prefix: "contextualized/".to_string(),
            poll_interval: Duration::from_secs(15),
            inactivity_timeout: Duration::from_secs(60),
            processing_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(600),
            sweep_batch_limit: 100,
            allow_reactivation: false,
            analytics_bucket: None,
            analytics_object: None,
        }
    }
}

impl WatchConfig {
    /// Derived output location for a folder: a fixed deterministic prefix
    /// transform (`test/a` -> `contextualized/test/a`).
    pub fn output_folder(&self, folder: &str) -> String {
        format!("{}{folder}", self.output_prefix)
    }

    pub fn analytics_sink(&self) -> Option<(&str, &str)> {
        match (&self.analytics_bucket, &self.analytics_object) {
            (Some(bucket), Some(object)) if !bucket.is_empty() && !object.is_empty() => {
                Some((bucket.as_str(), object.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_folder_prepends_transform_prefix() {
        let config = WatchConfig::default();
        assert_eq!(config.output_folder("test/sub"), "contextualized/test/sub");
    }

    #[test]
    fn analytics_sink_requires_both_halves() {
        let mut config = WatchConfig::default();
        assert!(config.analytics_sink().is_none());
        config.analytics_bucket = Some("analytics".into());
        assert!(config.analytics_sink().is_none());
        config.analytics_object = Some("completions.csv".into());
        assert_eq!(config.analytics_sink(), Some(("analytics", "completions.csv")));
    }
}
