//! HTTP surface: the push-subscription endpoint plus health and warmup.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use inflow_core::{FolderWatchService, ObjectCreatedEvent};

use crate::errors::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FolderWatchService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(receive_push))
        .route("/health", get(health))
        .route("/_ah/warmup", get(warmup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Object-creation payload carried inside the push message, base64-encoded
/// JSON from the storage notification.
#[derive(Debug, Deserialize)]
struct StorageEvent {
    name: Option<String>,
    bucket: Option<String>,
    #[serde(rename = "timeCreated")]
    time_created: Option<String>,
}

fn decode_event(data: &str) -> anyhow::Result<ObjectCreatedEvent> {
    let bytes = BASE64.decode(data).context("payload is not valid base64")?;
    let payload: StorageEvent =
        serde_json::from_slice(&bytes).context("payload is not valid JSON")?;
    Ok(ObjectCreatedEvent {
        name: payload.name.context("event missing object name")?,
        bucket: payload.bucket.context("event missing bucket")?,
        time_created: payload
            .time_created
            .unwrap_or_else(|| "Unknown".to_string()),
    })
}

/// Push-subscription intake.
///
/// A missing or malformed envelope is the subscriber's bug and gets a 400.
/// A well-formed envelope with an undecodable payload is a poison message:
/// acknowledged with 200 so the subscription does not redeliver it forever.
async fn receive_push(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<&'static str> {
    let Some(data) = body
        .get("message")
        .and_then(|message| message.get("data"))
        .and_then(Value::as_str)
    else {
        return Err(AppError::bad_request("missing push message data"));
    };

    let event = match decode_event(data) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "acknowledging undecodable push payload");
            return Ok("OK");
        }
    };
    info!(key = %event.name, bucket = %event.bucket, "received object event");
    state.service.handle_object_created(&event).await?;
    Ok("OK")
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn warmup() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
