//! Shared configuration library for Inflow.
//!
//! Centralizes env-var parsing and defaults for the watch service so the
//! server binary and any future tooling agree on variable names, defaults,
//! and validation rules.

pub mod util;

use std::time::Duration;

use anyhow::{bail, Context};
use tracing::warn;

use inflow_core::classify::normalize_prefixes;
use inflow_core::notify::NotifierStrategy;
use inflow_core::WatchConfig;

use crate::util::{parse_bool_var, parse_csv_var, parse_duration_var, parse_string_var};

/// Which metadata-store and object-store adapters to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataBackend {
    /// Firestore + GCS over REST. The production default.
    #[default]
    Gcp,
    /// In-process adapters. Single-instance local runs and tests only: state
    /// does not survive a restart.
    Memory,
}

/// Slack credentials as found in the environment. Strategy selection happens
/// once, via [`ServiceConfig::notifier_strategy`].
#[derive(Debug, Clone, Default)]
pub struct SlackSettings {
    pub bot_token: Option<String>,
    pub channel: Option<String>,
    pub webhook_url: Option<String>,
}

/// Full service configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub watch: WatchConfig,
    pub backend: MetadataBackend,
    pub slack: SlackSettings,
    /// GCP project hosting the Firestore database.
    pub project_id: String,
    pub port: u16,
    pub disable_sweep: bool,
}

/// Firestore collection holding one document per folder.
pub const RECORDS_COLLECTION: &str = "notified_folders";
/// Firestore collection acting as the durable work queue.
pub const WORK_COLLECTION: &str = "folders_needing_check";

impl ServiceConfig {
    /// Assemble the configuration from environment variables, falling back
    /// to the reference deployment's defaults. Only structurally invalid
    /// values (bad port, unknown backend) are errors; everything optional
    /// simply stays at its default.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let mut watch = WatchConfig {
            incoming_bucket: parse_string_var("BUCKET_NAME")
                .unwrap_or_else(|| "moove-incoming-data-u7x4ty".to_string()),
            outgoing_bucket: parse_string_var("OUTGOING_BUCKET_NAME")
                .unwrap_or_else(|| "moove-outgoing-data-u7x4ty".to_string()),
            monitored_prefixes: normalize_prefixes(
                parse_csv_var("MONITORED_PREFIXES").unwrap_or_else(|| {
                    vec![
                        "Prebind/".to_string(),
                        "Postbind/".to_string(),
                        "test/".to_string(),
                    ]
                }),
            ),
            allow_reactivation: parse_bool_var("INFLOW_ALLOW_REACTIVATION").unwrap_or(false),
            analytics_bucket: parse_string_var("ANALYTICS_BUCKET"),
            analytics_object: parse_string_var("ANALYTICS_OBJECT"),
            ..WatchConfig::default()
        };
        if watch.monitored_prefixes.is_empty() {
            bail!("MONITORED_PREFIXES resolved to an empty list");
        }
        if watch.analytics_bucket.is_some() != watch.analytics_object.is_some() {
            warn!("ANALYTICS_BUCKET and ANALYTICS_OBJECT must both be set; analytics disabled");
        }

        if let Some(interval) = parse_duration_var("INFLOW_POLL_INTERVAL") {
            watch.poll_interval = interval;
        }
        if let Some(timeout) = parse_duration_var("INFLOW_INACTIVITY_TIMEOUT") {
            watch.inactivity_timeout = timeout;
        }
        if let Some(interval) = parse_duration_var("INFLOW_PROCESSING_INTERVAL") {
            watch.processing_interval = interval;
        }
        if let Some(interval) = parse_duration_var("INFLOW_SWEEP_INTERVAL") {
            watch.sweep_interval = interval;
        }
        if watch.poll_interval < Duration::from_secs(1) {
            bail!("INFLOW_POLL_INTERVAL must be at least one second");
        }

        let backend = match parse_string_var("INFLOW_BACKEND").as_deref() {
            None | Some("gcp") => MetadataBackend::Gcp,
            Some("memory") => MetadataBackend::Memory,
            Some(other) => bail!("unknown INFLOW_BACKEND {other:?} (expected gcp or memory)"),
        };

        let port = match parse_string_var("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid PORT {raw:?}"))?,
            None => 8080,
        };

        Ok(Self {
            watch,
            backend,
            slack: SlackSettings {
                bot_token: parse_string_var("SLACK_BOT_TOKEN"),
                channel: parse_string_var("SLACK_CHANNEL"),
                webhook_url: parse_string_var("SLACK_WEBHOOK_URL"),
            },
            project_id: parse_string_var("GCP_PROJECT")
                .unwrap_or_else(|| "moove-data-pipelines".to_string()),
            port,
            disable_sweep: parse_bool_var("INFLOW_DISABLE_SWEEP").unwrap_or(false),
        })
    }

    /// Decide the notification strategy from the configured credentials.
    pub fn notifier_strategy(&self) -> NotifierStrategy {
        NotifierStrategy::from_settings(
            self.slack.bot_token.clone(),
            self.slack.channel.clone(),
            self.slack.webhook_url.clone(),
        )
    }
}
