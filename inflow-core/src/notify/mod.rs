//! Notification port: post one initial message per folder, then edit it (or
//! emit a one-shot fallback) as the folder progresses to completion.

mod slack;

pub use slack::SlackNotifier;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::MessageRef;

/// Delivery capability, decided once at configuration time and never
/// re-derived per call.
#[derive(Debug, Clone)]
pub enum NotifierStrategy {
    /// No mechanism configured; notifications degrade to log lines.
    Disabled,
    /// Fire-and-forget webhook. The final update becomes a second, separate
    /// message because webhooks cannot edit.
    Webhook { url: String },
    /// Bot integration: post returns an editable reference, updates edit the
    /// original message in place. A configured bot NEVER falls back to the
    /// webhook path, which would risk duplicate messages.
    Bot { token: String, channel: String },
}

impl NotifierStrategy {
    /// Select a strategy from optional credentials, preferring the bot.
    pub fn from_settings(
        bot_token: Option<String>,
        channel: Option<String>,
        webhook_url: Option<String>,
    ) -> Self {
        match (bot_token, channel) {
            (Some(token), Some(channel)) if !token.is_empty() && !channel.is_empty() => {
                Self::Bot { token, channel }
            }
            _ => match webhook_url {
                Some(url) if !url.is_empty() => Self::Webhook { url },
                _ => Self::Disabled,
            },
        }
    }

    pub fn can_edit(&self) -> bool {
        matches!(self, Self::Bot { .. })
    }
}

/// Data for a progress or final update of the folder's message.
#[derive(Debug, Clone, Default)]
pub struct CompletionUpdate {
    pub file_count: u64,
    pub total_size_bytes: u64,
    /// `Some(0)` renders "complete"; `Some(n)` renders "n files remaining";
    /// `None` omits the processing line (upload-final update).
    pub processing_remaining: Option<i64>,
    /// ISO timestamp of the check that produced this update.
    pub check_time: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post the initial "new folder" message. Returns the editable reference
    /// when the channel supports later edits, `None` otherwise (webhook or
    /// disabled).
    async fn post_initial(&self, folder: &str, first_seen: &str) -> Result<Option<MessageRef>>;

    /// Post or edit the completion/progress message. Returns `true` when the
    /// update actually went out; `false` when no mechanism or reference was
    /// available. Transport failures surface as errors.
    async fn post_update(
        &self,
        folder: &str,
        first_seen: &str,
        update: &CompletionUpdate,
        message: Option<&MessageRef>,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_wins_over_webhook() {
        let strategy = NotifierStrategy::from_settings(
            Some("xoxb-1".into()),
            Some("C01".into()),
            Some("https://hooks.example/x".into()),
        );
        assert!(matches!(strategy, NotifierStrategy::Bot { .. }));
        assert!(strategy.can_edit());
    }

    #[test]
    fn webhook_requires_no_bot() {
        let strategy = NotifierStrategy::from_settings(
            None,
            Some("C01".into()),
            Some("https://hooks.example/x".into()),
        );
        assert!(matches!(strategy, NotifierStrategy::Webhook { .. }));
        assert!(!strategy.can_edit());
    }

    #[test]
    fn nothing_configured_is_disabled() {
        let strategy = NotifierStrategy::from_settings(Some(String::new()), None, None);
        assert!(matches!(strategy, NotifierStrategy::Disabled));
    }
}
