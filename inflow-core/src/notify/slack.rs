//! Slack delivery: `chat.postMessage`/`chat.update` in bot mode, a plain
//! webhook POST otherwise.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{InflowError, Result};
use crate::format::{format_duration_between, human_size, round_to_second};
use crate::record::MessageRef;

use super::{CompletionUpdate, Notifier, NotifierStrategy};

#[derive(Debug)]
pub struct SlackNotifier {
    client: reqwest::Client,
    strategy: NotifierStrategy,
    /// Incoming bucket name, shown alongside the folder path.
    bucket: String,
    api_base: String,
}

impl SlackNotifier {
    pub fn new(client: reqwest::Client, strategy: NotifierStrategy, bucket: &str) -> Self {
        Self {
            client,
            strategy,
            bucket: bucket.to_string(),
            api_base: "https://slack.com/api".to_string(),
        }
    }

    /// Point API calls at a test server.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn api_post(&self, token: &str, method: &str, payload: Value) -> Result<Value> {
        let url = format!("{}/{method}", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            return Err(InflowError::Notify(format!(
                "slack api error for {method}: {body}"
            )));
        }
        Ok(body)
    }

    fn initial_blocks(&self, folder: &str, first_seen: &str) -> Value {
        json!([
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "\u{1F4C1} New Data Folder" },
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Folder:*\n`{}/{}`", self.bucket, folder) },
                    { "type": "mrkdwn", "text": format!("*First File Time:*\n{}", round_to_second(first_seen)) },
                ],
            },
        ])
    }

    fn update_blocks(&self, folder: &str, first_seen: &str, update: &CompletionUpdate) -> Value {
        let first_time = round_to_second(first_seen);
        let mut fields = vec![
            json!({ "type": "mrkdwn", "text": format!("*Folder:*\n`{}/{}`", self.bucket, folder) }),
            json!({ "type": "mrkdwn", "text": format!("*First File Time:*\n{first_time}") }),
            json!({ "type": "mrkdwn", "text": format!("*Data Files:*\n{}", update.file_count) }),
            json!({ "type": "mrkdwn", "text": format!("*Total Size:*\n{}", human_size(update.total_size_bytes)) }),
        ];
        if let Some(remaining) = update.processing_remaining {
            let status = if remaining == 0 {
                "\u{2705} Complete (0 files remaining)".to_string()
            } else {
                format!("\u{23F3} {remaining} files remaining")
            };
            fields.push(json!({ "type": "mrkdwn", "text": format!("*Processing Status:*\n{status}") }));
        }
        if let Some(check_time) = &update.check_time {
            let check_rounded = round_to_second(check_time);
            fields.push(
                json!({ "type": "mrkdwn", "text": format!("*Last Check:*\n{check_rounded}") }),
            );
            let duration = format_duration_between(&first_time, &check_rounded);
            if duration != "Unknown" {
                fields.push(
                    json!({ "type": "mrkdwn", "text": format!("*Duration:*\n{duration}") }),
                );
            }
        }

        json!([
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "\u{1F4C1} New Data Folder" },
            },
            { "type": "section", "fields": fields },
        ])
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post_initial(&self, folder: &str, first_seen: &str) -> Result<Option<MessageRef>> {
        match &self.strategy {
            NotifierStrategy::Disabled => {
                warn!(folder, "no notification mechanism configured, skipping initial message");
                Ok(None)
            }
            NotifierStrategy::Webhook { url } => {
                let message = json!({
                    "text": "\u{1F195} New data folder detected",
                    "blocks": self.initial_blocks(folder, first_seen),
                });
                self.client
                    .post(url)
                    .json(&message)
                    .send()
                    .await?
                    .error_for_status()?;
                info!(folder, "initial notification sent via webhook");
                Ok(None)
            }
            NotifierStrategy::Bot { token, channel } => {
                let body = self
                    .api_post(
                        token,
                        "chat.postMessage",
                        json!({
                            "channel": channel,
                            "text": format!("New folder: {}/{}", self.bucket, folder),
                            "blocks": self.initial_blocks(folder, first_seen),
                        }),
                    )
                    .await?;
                let ts = body.get("ts").and_then(Value::as_str);
                let channel = body
                    .get("channel")
                    .and_then(Value::as_str)
                    .unwrap_or(channel);
                info!(folder, ts, channel, "initial notification posted");
                Ok(ts.map(|ts| MessageRef {
                    channel: channel.to_string(),
                    ts: ts.to_string(),
                }))
            }
        }
    }

    async fn post_update(
        &self,
        folder: &str,
        first_seen: &str,
        update: &CompletionUpdate,
        message: Option<&MessageRef>,
    ) -> Result<bool> {
        match &self.strategy {
            NotifierStrategy::Disabled => {
                warn!(folder, "no notification mechanism configured for update");
                Ok(false)
            }
            NotifierStrategy::Webhook { url } => {
                // A webhook cannot edit; the final update lands as a second
                // message.
                let body = json!({
                    "text": format!("\u{2705} Folder upload complete: {folder}"),
                    "blocks": self.update_blocks(folder, first_seen, update),
                });
                self.client
                    .post(url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                info!(folder, "final notification sent via webhook");
                Ok(true)
            }
            NotifierStrategy::Bot { token, channel: _ } => {
                let Some(message) = message else {
                    warn!(folder, "cannot edit message: no stored reference");
                    return Ok(false);
                };
                self.api_post(
                    token,
                    "chat.update",
                    json!({
                        "channel": message.channel,
                        "ts": message.ts,
                        "text": format!("Folder complete: {}/{}", self.bucket, folder),
                        "blocks": self.update_blocks(folder, first_seen, update),
                    }),
                )
                .await?;
                info!(folder, ts = %message.ts, "edited notification message");
                Ok(true)
            }
        }
    }
}
