//! Google Cloud Storage adapter over the JSON API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::{InflowError, Result};
use crate::gcp::TokenSource;

use super::{ObjectMeta, ObjectStore};

#[derive(Debug)]
pub struct GcsStore {
    client: reqwest::Client,
    tokens: TokenSource,
    base_url: String,
    upload_base_url: String,
}

impl GcsStore {
    pub fn new(client: reqwest::Client, auth_token: Option<String>) -> Self {
        let tokens = TokenSource::new(client.clone(), auth_token);
        Self {
            client,
            tokens,
            base_url: "https://storage.googleapis.com/storage/v1".to_string(),
            upload_base_url: "https://storage.googleapis.com/upload/storage/v1".to_string(),
        }
    }

    /// Point the adapter at a fake GCS server (tests, emulators).
    pub fn with_base_urls(mut self, base_url: &str, upload_base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self.upload_base_url = upload_base_url.trim_end_matches('/').to_string();
        self
    }
}

/// Percent-encode an object key for use inside a URL path segment. The JSON
/// API requires `/` in object names to travel as `%2F`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let token = self.tokens.bearer_token().await?;
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(format!("{}/b/{bucket}/o", self.base_url))
                .bearer_auth(&token)
                .query(&[
                    ("prefix", prefix),
                    ("fields", "items(name,size),nextPageToken"),
                ]);
            if let Some(next) = &page_token {
                request = request.query(&[("pageToken", next.as_str())]);
            }
            let body: Value = request.send().await?.error_for_status()?.json().await?;
            if let Some(page_items) = body.get("items").and_then(Value::as_array) {
                for item in page_items {
                    let Some(name) = item.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    // Sizes travel as strings in the JSON API.
                    let size = item
                        .get("size")
                        .and_then(Value::as_str)
                        .and_then(|raw| raw.parse().ok())
                        .unwrap_or(0);
                    items.push(ObjectMeta {
                        name: name.to_string(),
                        size,
                    });
                }
            }
            match body.get("nextPageToken").and_then(Value::as_str) {
                Some(next) => page_token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(items)
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let token = self.tokens.bearer_token().await?;
        let url = format!(
            "{}/b/{bucket}/o/{}?alt=media",
            self.base_url,
            encode_key(key)
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn read_with_generation(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(Vec<u8>, i64)>> {
        let token = self.tokens.bearer_token().await?;
        let meta_url = format!("{}/b/{bucket}/o/{}", self.base_url, encode_key(key));
        let response = self.client.get(&meta_url).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let meta: Value = response.error_for_status()?.json().await?;
        let generation = meta
            .get("generation")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| InflowError::ObjectStore("object metadata missing generation".into()))?;
        let bytes = self.read(bucket, key).await?;
        Ok(Some((bytes, generation)))
    }

    async fn write(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        if_generation_match: Option<i64>,
    ) -> Result<bool> {
        let token = self.tokens.bearer_token().await?;
        let mut request = self
            .client
            .post(format!("{}/b/{bucket}/o", self.upload_base_url))
            .bearer_auth(token)
            .query(&[("uploadType", "media"), ("name", key)])
            .header("Content-Type", content_type)
            .body(bytes);
        if let Some(generation) = if_generation_match {
            request = request.query(&[("ifGenerationMatch", generation.to_string())]);
        }
        let response = request.send().await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }
}
