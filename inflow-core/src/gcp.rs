//! Bearer-token acquisition for Google Cloud REST calls.
//!
//! A static token (tests, local development) short-circuits everything;
//! otherwise the GCE metadata server supplies the ambient service-account
//! credential, cached until close to expiry.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{InflowError, Result};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens from the metadata server last an hour; refresh well before that.
const CACHE_MINUTES: i64 = 45;

#[derive(Debug)]
pub struct TokenSource {
    client: reqwest::Client,
    static_token: Option<String>,
    cached: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl TokenSource {
    pub fn new(client: reqwest::Client, static_token: Option<String>) -> Self {
        Self {
            client,
            static_token,
            cached: Mutex::new(None),
        }
    }

    pub async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }
        let mut cached = self.cached.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref() {
            if Utc::now().signed_duration_since(*fetched_at).num_minutes() < CACHE_MINUTES {
                return Ok(token.clone());
            }
        }
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                InflowError::Internal("metadata token response missing access_token".into())
            })?
            .to_string();
        *cached = Some((token.clone(), Utc::now()));
        Ok(token)
    }
}
