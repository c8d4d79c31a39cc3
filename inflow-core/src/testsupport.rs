//! In-process test doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{InflowError, Result};
use crate::notify::{CompletionUpdate, Notifier};
use crate::record::MessageRef;

/// A [`Notifier`] that records every call instead of talking to a chat
/// service. Behaves like the bot strategy (editable references) unless
/// constructed with [`RecordingNotifier::without_edits`].
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    editable: bool,
    fail_updates: AtomicBool,
    next_ts: AtomicU64,
    initials: Mutex<Vec<String>>,
    updates: Mutex<Vec<(String, CompletionUpdate)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            editable: true,
            ..Self::default()
        }
    }

    /// Webhook-like behavior: posts succeed but return no editable
    /// reference.
    pub fn without_edits() -> Self {
        Self::default()
    }

    /// Make subsequent `post_update` calls fail with a transport error.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn initial_posts(&self) -> Vec<String> {
        self.initials.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, CompletionUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last_update(&self) -> Option<CompletionUpdate> {
        self.updates
            .lock()
            .unwrap()
            .last()
            .map(|(_, update)| update.clone())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post_initial(&self, folder: &str, _first_seen: &str) -> Result<Option<MessageRef>> {
        self.initials.lock().unwrap().push(folder.to_string());
        if self.editable {
            let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
            Ok(Some(MessageRef {
                channel: "C-test".to_string(),
                ts: format!("{ts}.000"),
            }))
        } else {
            Ok(None)
        }
    }

    async fn post_update(
        &self,
        folder: &str,
        _first_seen: &str,
        update: &CompletionUpdate,
        _message: Option<&MessageRef>,
    ) -> Result<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(InflowError::Notify("injected update failure".to_string()));
        }
        self.updates
            .lock()
            .unwrap()
            .push((folder.to_string(), update.clone()));
        Ok(true)
    }
}
