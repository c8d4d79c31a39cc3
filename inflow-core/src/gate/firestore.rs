//! Firestore-backed gate using the REST documents API.
//!
//! Transitions are enforced with `currentDocument` preconditions on
//! `documents:commit`: a create requires `exists=false`, and an update
//! requires the `updateTime` observed by the preceding read. A precondition
//! failure means another instance won the race; the operation re-reads once
//! or twice and stands down when the state already advanced.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{InflowError, Result};
use crate::gcp::TokenSource;
use crate::record::{doc_id, FolderRecord, FolderState, MessageRef, WorkQueueEntry};

use super::MetadataGate;

const CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct FirestoreGateConfig {
    pub project_id: String,
    /// Collection holding one document per folder.
    pub records_collection: String,
    /// Secondary collection acting as the durable work queue.
    pub work_collection: String,
    /// Static bearer token. When absent the GCE metadata server is queried
    /// (the ambient service-account credential on Cloud Run).
    pub auth_token: Option<String>,
    /// Override for emulators; defaults to the public endpoint.
    pub base_url: Option<String>,
    pub allow_reactivation: bool,
}

impl FirestoreGateConfig {
    fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| "https://firestore.googleapis.com".to_string())
    }
}

#[derive(Debug)]
pub struct FirestoreGate {
    client: reqwest::Client,
    tokens: TokenSource,
    config: FirestoreGateConfig,
}

struct ReadDocument {
    fields: Map<String, Value>,
    update_time: String,
}

impl FirestoreGate {
    pub fn new(client: reqwest::Client, config: FirestoreGateConfig) -> Self {
        let tokens = TokenSource::new(client.clone(), config.auth_token.clone());
        Self {
            client,
            tokens,
            config,
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/(default)/documents",
            self.config.base_url(),
            self.config.project_id
        )
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{}/{}",
            self.config.project_id, collection, id
        )
    }

    async fn bearer_token(&self) -> Result<String> {
        self.tokens.bearer_token().await
    }

    async fn read_document(&self, collection: &str, id: &str) -> Result<Option<ReadDocument>> {
        let token = self.bearer_token().await?;
        let url = format!("{}/{}/{}", self.documents_root(), collection, id);
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let body: Value = response.json().await?;
        let fields = body
            .get("fields")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let update_time = body
            .get("updateTime")
            .and_then(Value::as_str)
            .ok_or_else(|| InflowError::Store("document missing updateTime".into()))?
            .to_string();
        Ok(Some(ReadDocument {
            fields,
            update_time,
        }))
    }

    /// Run a commit batch; `Ok(true)` on success, `Ok(false)` when a
    /// precondition failed (another writer got there first).
    async fn commit(&self, writes: Vec<Value>) -> Result<bool> {
        let token = self.bearer_token().await?;
        let url = format!(
            "{}/v1/projects/{}/databases/(default)/documents:commit",
            self.config.base_url(),
            self.config.project_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "writes": writes }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::CONFLICT || status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT || body.contains("FAILED_PRECONDITION") {
                debug!(%status, "commit lost a precondition race");
                return Ok(false);
            }
            return Err(InflowError::Store(format!("commit rejected: {status} {body}")));
        }
        Err(InflowError::Store(format!(
            "commit failed with status {status}"
        )))
    }

    fn record_write(&self, record: &FolderRecord, precondition: Value) -> Value {
        json!({
            "update": {
                "name": self.document_name(
                    &self.config.records_collection,
                    &doc_id(&record.folder_path),
                ),
                "fields": record_fields(record),
            },
            "currentDocument": precondition,
        })
    }
}

#[async_trait::async_trait]
impl MetadataGate for FirestoreGate {
    async fn open(&self, folder: &str, first_seen: &str) -> Result<bool> {
        let id = doc_id(folder);
        for _ in 0..CAS_ATTEMPTS {
            match self.read_document(&self.config.records_collection, &id).await? {
                None => {
                    let record = FolderRecord::opened(folder, first_seen);
                    let write = self.record_write(&record, json!({ "exists": false }));
                    if self.commit(vec![write]).await? {
                        return Ok(true);
                    }
                    // Lost the create race; fall through to re-read.
                }
                Some(read) => {
                    let mut record = record_from_fields(folder, &read.fields)?;
                    if !(self.config.allow_reactivation
                        && record.state == FolderState::ProcessingComplete)
                    {
                        return Ok(false);
                    }
                    record.reactivate(first_seen);
                    let write = self
                        .record_write(&record, json!({ "updateTime": read.update_time }));
                    if self.commit(vec![write]).await? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    async fn finalize_upload(
        &self,
        folder: &str,
        file_count: u64,
        total_size_bytes: u64,
    ) -> Result<bool> {
        let id = doc_id(folder);
        for _ in 0..CAS_ATTEMPTS {
            let Some(read) = self
                .read_document(&self.config.records_collection, &id)
                .await?
            else {
                return Ok(false);
            };
            let mut record = record_from_fields(folder, &read.fields)?;
            if record.state != FolderState::Open {
                return Ok(false);
            }
            record.state = FolderState::UploadFinal;
            record.upload_final_at = Some(Utc::now());
            record.file_count = file_count;
            record.total_size_bytes = total_size_bytes;

            let entry = WorkQueueEntry {
                folder_path: folder.to_string(),
                file_count,
                total_size_bytes,
                enqueued_at: Utc::now(),
            };
            let writes = vec![
                self.record_write(&record, json!({ "updateTime": read.update_time })),
                json!({
                    "update": {
                        "name": self.document_name(&self.config.work_collection, &id),
                        "fields": entry_fields(&entry),
                    },
                }),
            ];
            if self.commit(writes).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn complete_processing(&self, folder: &str) -> Result<bool> {
        let id = doc_id(folder);
        for _ in 0..CAS_ATTEMPTS {
            let Some(read) = self
                .read_document(&self.config.records_collection, &id)
                .await?
            else {
                return Ok(false);
            };
            let mut record = record_from_fields(folder, &read.fields)?;
            if record.state != FolderState::UploadFinal {
                return Ok(false);
            }
            record.state = FolderState::ProcessingComplete;

            let writes = vec![
                self.record_write(&record, json!({ "updateTime": read.update_time })),
                json!({
                    "delete": self.document_name(&self.config.work_collection, &id),
                }),
            ];
            if self.commit(writes).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get(&self, folder: &str) -> Result<Option<FolderRecord>> {
        let id = doc_id(folder);
        match self.read_document(&self.config.records_collection, &id).await? {
            None => Ok(None),
            Some(read) => Ok(Some(record_from_fields(folder, &read.fields)?)),
        }
    }

    async fn save_notification_ref(&self, folder: &str, message: &MessageRef) -> Result<()> {
        let id = doc_id(folder);
        let Some(read) = self
            .read_document(&self.config.records_collection, &id)
            .await?
        else {
            return Err(InflowError::Store(format!(
                "no record for folder {folder}"
            )));
        };
        let mut record = record_from_fields(folder, &read.fields)?;
        record.notification_ref = Some(message.clone());
        let write = self.record_write(&record, json!({ "updateTime": read.update_time }));
        if self.commit(vec![write]).await? {
            Ok(())
        } else {
            Err(InflowError::Store(
                "notification ref write lost an update race".into(),
            ))
        }
    }

    async fn refresh_stats(
        &self,
        folder: &str,
        file_count: u64,
        total_size_bytes: u64,
    ) -> Result<()> {
        let id = doc_id(folder);
        let Some(read) = self
            .read_document(&self.config.records_collection, &id)
            .await?
        else {
            return Ok(());
        };
        let mut record = record_from_fields(folder, &read.fields)?;
        record.file_count = file_count;
        record.total_size_bytes = total_size_bytes;
        let write = self.record_write(&record, json!({ "updateTime": read.update_time }));
        // A lost race here just means fresher data already landed.
        let _ = self.commit(vec![write]).await?;
        Ok(())
    }

    async fn pending_work(&self, limit: usize) -> Result<Vec<WorkQueueEntry>> {
        let token = self.bearer_token().await?;
        let url = format!(
            "{}/{}?pageSize={}",
            self.documents_root(),
            self.config.work_collection,
            limit
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        let mut entries = Vec::new();
        if let Some(docs) = body.get("documents").and_then(Value::as_array) {
            for doc in docs {
                let Some(fields) = doc.get("fields").and_then(Value::as_object) else {
                    continue;
                };
                if let Some(entry) = entry_from_fields(fields) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<FolderRecord>> {
        let token = self.bearer_token().await?;
        let url = format!(
            "{}/{}?pageSize={}",
            self.documents_root(),
            self.config.records_collection,
            limit
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        let mut records = Vec::new();
        if let Some(docs) = body.get("documents").and_then(Value::as_array) {
            for doc in docs {
                let Some(fields) = doc.get("fields").and_then(Value::as_object) else {
                    continue;
                };
                let folder = string_field(fields, "folder_path").unwrap_or_default();
                if folder.is_empty() {
                    continue;
                }
                records.push(record_from_fields(&folder, fields)?);
            }
        }
        Ok(records)
    }
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn int_value(value: u64) -> Value {
    // Firestore integers travel as strings.
    json!({ "integerValue": value.to_string() })
}

fn timestamp_value(value: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": value.to_rfc3339() })
}

fn record_fields(record: &FolderRecord) -> Value {
    let mut fields = Map::new();
    fields.insert("folder_path".into(), string_value(&record.folder_path));
    fields.insert(
        "state".into(),
        string_value(match record.state {
            FolderState::Open => "OPEN",
            FolderState::UploadFinal => "UPLOAD_FINAL",
            FolderState::ProcessingComplete => "PROCESSING_COMPLETE",
        }),
    );
    fields.insert("first_seen_at".into(), string_value(&record.first_seen_at));
    if let Some(at) = &record.upload_final_at {
        fields.insert("upload_final_at".into(), timestamp_value(at));
    }
    fields.insert("file_count".into(), int_value(record.file_count));
    fields.insert(
        "total_size_bytes".into(),
        int_value(record.total_size_bytes),
    );
    if let Some(message) = &record.notification_ref {
        fields.insert("slack_channel".into(), string_value(&message.channel));
        fields.insert("slack_message_ts".into(), string_value(&message.ts));
    }
    fields.insert("generation".into(), int_value(record.generation as u64));
    fields.insert(
        "reactivation_count".into(),
        int_value(record.reactivation_count as u64),
    );
    Value::Object(fields)
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)?
        .get("stringValue")?
        .as_str()
        .map(str::to_string)
}

fn int_field(fields: &Map<String, Value>, name: &str) -> u64 {
    fields
        .get(name)
        .and_then(|v| v.get("integerValue"))
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

fn timestamp_field(fields: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    fields
        .get(name)?
        .get("timestampValue")?
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn record_from_fields(folder: &str, fields: &Map<String, Value>) -> Result<FolderRecord> {
    let state = match string_field(fields, "state").as_deref() {
        Some("OPEN") | None => FolderState::Open,
        Some("UPLOAD_FINAL") => FolderState::UploadFinal,
        Some("PROCESSING_COMPLETE") => FolderState::ProcessingComplete,
        Some(other) => {
            return Err(InflowError::Store(format!(
                "unknown folder state {other:?} for {folder}"
            )))
        }
    };
    let notification_ref = match (
        string_field(fields, "slack_channel"),
        string_field(fields, "slack_message_ts"),
    ) {
        (Some(channel), Some(ts)) => Some(MessageRef { channel, ts }),
        _ => None,
    };
    Ok(FolderRecord {
        folder_path: string_field(fields, "folder_path").unwrap_or_else(|| folder.to_string()),
        state,
        first_seen_at: string_field(fields, "first_seen_at").unwrap_or_default(),
        upload_final_at: timestamp_field(fields, "upload_final_at"),
        file_count: int_field(fields, "file_count"),
        total_size_bytes: int_field(fields, "total_size_bytes"),
        notification_ref,
        generation: int_field(fields, "generation").max(1) as u32,
        reactivation_count: int_field(fields, "reactivation_count") as u32,
    })
}

fn entry_fields(entry: &WorkQueueEntry) -> Value {
    json!({
        "folder_path": string_value(&entry.folder_path),
        "file_count": int_value(entry.file_count),
        "total_size_bytes": int_value(entry.total_size_bytes),
        "added_at": timestamp_value(&entry.enqueued_at),
    })
}

fn entry_from_fields(fields: &Map<String, Value>) -> Option<WorkQueueEntry> {
    let folder_path = string_field(fields, "folder_path")?;
    Some(WorkQueueEntry {
        folder_path,
        file_count: int_field(fields, "file_count"),
        total_size_bytes: int_field(fields, "total_size_bytes"),
        enqueued_at: timestamp_field(fields, "added_at").unwrap_or_else(Utc::now),
    })
}
