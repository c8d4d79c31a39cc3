//! Object-store port: listing, byte reads, and generation-preconditioned
//! writes against bucket storage.

mod gcs;
mod memory;

pub use gcs::GcsStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;

use crate::error::Result;

/// Listing entry: object key plus its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects whose key starts with `prefix`, in listing order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Full object payload.
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Payload plus the object generation for later conditional writes.
    /// `None` when the object does not exist.
    async fn read_with_generation(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(Vec<u8>, i64)>>;

    /// Write an object. `if_generation_match` of `Some(0)` requires the
    /// object to be absent; `Some(n)` requires the current generation to be
    /// exactly `n`; `None` writes unconditionally. Returns `false` when the
    /// precondition failed (concurrent writer), `true` on success.
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        if_generation_match: Option<i64>,
    ) -> Result<bool>;
}
