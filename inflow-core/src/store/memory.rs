//! In-memory object store for tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{InflowError, Result};

use super::{ObjectMeta, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    generation: i64,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    // BTreeMap keeps listings in key order, like real bucket listings.
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    listing_poisoned: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, bumping its generation.
    pub async fn put_object(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        let mut objects = self.objects.lock().await;
        let entry_key = (bucket.to_string(), key.to_string());
        let generation = objects.get(&entry_key).map(|o| o.generation + 1).unwrap_or(1);
        objects.insert(
            entry_key,
            StoredObject {
                bytes: bytes.into(),
                generation,
            },
        );
    }

    pub async fn remove_object(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
    }

    /// Make subsequent `list` calls fail, for fault-path tests.
    pub async fn poison_listing(&self, poisoned: bool) {
        *self.listing_poisoned.lock().await = poisoned;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        if *self.listing_poisoned.lock().await {
            return Err(InflowError::ObjectStore("listing poisoned".into()));
        }
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), stored)| ObjectMeta {
                name: key.clone(),
                size: stored.bytes.len() as u64,
            })
            .collect())
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|stored| stored.bytes.clone())
            .ok_or_else(|| InflowError::ObjectStore(format!("no such object {bucket}/{key}")))
    }

    async fn read_with_generation(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(Vec<u8>, i64)>> {
        let objects = self.objects.lock().await;
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|stored| (stored.bytes.clone(), stored.generation)))
    }

    async fn write(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        if_generation_match: Option<i64>,
    ) -> Result<bool> {
        let mut objects = self.objects.lock().await;
        let entry_key = (bucket.to_string(), key.to_string());
        let current = objects.get(&entry_key).map(|o| o.generation).unwrap_or(0);
        if let Some(expected) = if_generation_match {
            if expected != current {
                return Ok(false);
            }
        }
        objects.insert(
            entry_key,
            StoredObject {
                bytes,
                generation: current + 1,
            },
        );
        Ok(true)
    }
}
