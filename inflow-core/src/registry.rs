//! Process-local map of folders with live monitors.
//!
//! The registry is a performance layer only: it dedupes monitor creation and
//! lets the sweep skip folders a local task already polls. Correctness always
//! rests on the durable store's compare-and-set operations. The lock guards
//! map mutation only and is never held across I/O.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-folder monitor state. Never persisted; lost on restart, which is why
/// the durable work queue exists.
#[derive(Debug)]
struct MonitorHandle {
    last_activity: Instant,
    known_keys: HashSet<String>,
    incoming_file_count: Option<u64>,
    processing_claimed: bool,
}

impl MonitorHandle {
    fn new(initial_key: &str) -> Self {
        let mut handle = Self::empty();
        handle.known_keys.insert(initial_key.to_string());
        handle
    }

    fn empty() -> Self {
        Self {
            last_activity: Instant::now(),
            known_keys: HashSet::new(),
            incoming_file_count: None,
            processing_claimed: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FolderRegistry {
    folders: Mutex<HashMap<String, MonitorHandle>>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a folder for upload watching. Returns `true` when this call
    /// created the entry (the caller must spawn the monitor); an existing
    /// entry just absorbs the key and refreshes activity.
    pub async fn begin_watch(&self, folder: &str, initial_key: &str) -> bool {
        let mut folders = self.folders.lock().await;
        match folders.get_mut(folder) {
            Some(handle) => {
                handle.known_keys.insert(initial_key.to_string());
                handle.last_activity = Instant::now();
                false
            }
            None => {
                folders.insert(folder.to_string(), MonitorHandle::new(initial_key));
                true
            }
        }
    }

    /// Record event-driven activity for a folder already being watched.
    /// Returns `false` when the folder is not registered.
    pub async fn touch(&self, folder: &str, key: &str) -> bool {
        let mut folders = self.folders.lock().await;
        let Some(handle) = folders.get_mut(folder) else {
            return false;
        };
        handle.known_keys.insert(key.to_string());
        handle.last_activity = Instant::now();
        true
    }

    /// Diff a fresh listing against the known-key set. New keys reset the
    /// activity clock. Returns `None` when the folder is no longer
    /// registered, otherwise whether anything new appeared.
    pub async fn absorb_listing(&self, folder: &str, keys: &[String]) -> Option<bool> {
        let mut folders = self.folders.lock().await;
        let handle = folders.get_mut(folder)?;
        let mut found_new = false;
        for key in keys {
            if key.ends_with('/') {
                continue;
            }
            if handle.known_keys.insert(key.clone()) {
                found_new = true;
            }
        }
        if found_new {
            handle.last_activity = Instant::now();
        }
        Some(found_new)
    }

    /// Time since the folder last saw a new object, or `None` when it is not
    /// registered.
    pub async fn idle_for(&self, folder: &str) -> Option<Duration> {
        let folders = self.folders.lock().await;
        folders
            .get(folder)
            .map(|handle| handle.last_activity.elapsed())
    }

    pub async fn contains(&self, folder: &str) -> bool {
        self.folders.lock().await.contains_key(folder)
    }

    pub async fn remove(&self, folder: &str) {
        self.folders.lock().await.remove(folder);
    }

    pub async fn incoming_file_count(&self, folder: &str) -> Option<u64> {
        let folders = self.folders.lock().await;
        folders.get(folder).and_then(|handle| handle.incoming_file_count)
    }

    /// Claim the processing-monitor slot for a folder. Only the first caller
    /// gets `true`. Registers the folder when it was not already watched, so
    /// resumed folders (crash recovery, cross-instance races) can claim too.
    pub async fn claim_processing(&self, folder: &str, incoming_file_count: u64) -> bool {
        let mut folders = self.folders.lock().await;
        let handle = folders
            .entry(folder.to_string())
            .or_insert_with(MonitorHandle::empty);
        if handle.processing_claimed {
            return false;
        }
        handle.processing_claimed = true;
        handle.incoming_file_count = Some(incoming_file_count);
        true
    }

    /// Whether a live local processing monitor owns this folder.
    pub async fn has_processing(&self, folder: &str) -> bool {
        let folders = self.folders.lock().await;
        folders
            .get(folder)
            .map(|handle| handle.processing_claimed)
            .unwrap_or(false)
    }

    pub async fn watched_count(&self) -> usize {
        self.folders.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_watch_dedupes_creation() {
        let registry = FolderRegistry::new();
        assert!(registry.begin_watch("test/a", "test/a/f1").await);
        assert!(!registry.begin_watch("test/a", "test/a/f2").await);
        assert_eq!(registry.watched_count().await, 1);
    }

    #[tokio::test]
    async fn absorb_listing_detects_only_new_keys() {
        let registry = FolderRegistry::new();
        registry.begin_watch("test/a", "test/a/f1").await;

        let keys = vec!["test/a/f1".to_string(), "test/a/f2".to_string()];
        assert_eq!(registry.absorb_listing("test/a", &keys).await, Some(true));
        // Same listing again: nothing new.
        assert_eq!(registry.absorb_listing("test/a", &keys).await, Some(false));
        // Unregistered folder.
        assert_eq!(registry.absorb_listing("test/b", &keys).await, None);
    }

    #[tokio::test]
    async fn directory_placeholders_are_ignored() {
        let registry = FolderRegistry::new();
        registry.begin_watch("test/a", "test/a/f1").await;
        let keys = vec!["test/a/sub/".to_string()];
        assert_eq!(registry.absorb_listing("test/a", &keys).await, Some(false));
    }

    #[tokio::test]
    async fn processing_claim_is_single_shot() {
        let registry = FolderRegistry::new();
        registry.begin_watch("test/a", "test/a/f1").await;
        assert!(registry.claim_processing("test/a", 10).await);
        assert!(!registry.claim_processing("test/a", 10).await);
        assert!(registry.has_processing("test/a").await);
        assert_eq!(registry.incoming_file_count("test/a").await, Some(10));
    }

    #[tokio::test]
    async fn processing_claim_registers_unwatched_folders() {
        let registry = FolderRegistry::new();
        assert!(registry.claim_processing("test/b", 4).await);
        assert!(registry.contains("test/b").await);
        assert!(!registry.claim_processing("test/b", 4).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_activity_resets() {
        let registry = FolderRegistry::new();
        registry.begin_watch("test/a", "test/a/f1").await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.idle_for("test/a").await.unwrap() >= Duration::from_secs(30));

        registry.touch("test/a", "test/a/f2").await;
        assert!(registry.idle_for("test/a").await.unwrap() < Duration::from_secs(1));
    }
}
