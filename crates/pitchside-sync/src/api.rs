//! # REST Collaborators
//!
//! Thin `reqwest` client for the endpoints the sync layer consumes.
//!
//! ```text
//! POST /api/sync           replay a queued `sync` mutation (JSON body)
//! POST /api/upload         replay a queued `uploadFile`   (multipart, part "file")
//! PUT  /api/profile        replay a queued `updateProfile` (JSON body)
//! POST /api/sync/pending   { "lastSync": <ms> } → [ delta, ... ]
//! ```
//!
//! Every request carries `Authorization: Bearer <token>` when a token is
//! configured and is bounded by the configured timeout.
//!
//! Reads are deduplicated on their [`RequestKey`]: concurrent identical
//! `fetch_pending` calls share one HTTP request and its result. Mutations are
//! never merged.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use pitchside_core::{OfflineAction, OfflineQueueItem, RequestKey};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::config::ApiSettings;
use crate::error::{SyncError, SyncResult};
use crate::lock;
use crate::offline::ActionHandler;
use crate::orchestrator::ReconcileSource;

pub const PATH_SYNC: &str = "/api/sync";
pub const PATH_UPLOAD: &str = "/api/upload";
pub const PATH_PROFILE: &str = "/api/profile";
pub const PATH_PENDING: &str = "/api/sync/pending";

/// Body of a queued `uploadFile` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub content_base64: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl UploadPayload {
    pub fn from_value(payload: &Value) -> SyncResult<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| SyncError::ReplayRejected {
            action: OfflineAction::UploadFile.to_string(),
            reason: format!("malformed upload payload: {e}"),
        })
    }

    fn into_form(self) -> SyncResult<Form> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.content_base64.as_bytes())
            .map_err(|e| SyncError::ReplayRejected {
                action: OfflineAction::UploadFile.to_string(),
                reason: format!("invalid base64 content: {e}"),
            })?;

        let mut part = Part::bytes(bytes).file_name(self.file_name);
        if let Some(content_type) = &self.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| SyncError::ReplayRejected {
                    action: OfflineAction::UploadFile.to_string(),
                    reason: format!("invalid content type: {e}"),
                })?;
        }

        let mut form = Form::new().part("file", part);
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        Ok(form)
    }
}

// =============================================================================
// Client
// =============================================================================

type SharedRead = Shared<BoxFuture<'static, SyncResult<Vec<Value>>>>;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    in_flight: Arc<Mutex<HashMap<RequestKey, SharedRead>>>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.token.is_some())
            .field("in_flight", &self.in_flight_reads())
            .finish()
    }
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(ApiClient {
            http,
            base_url: Url::parse(&settings.base_url)?,
            token: settings.token.clone(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Deduplicated reads currently waiting on the server.
    pub fn in_flight_reads(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn url(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> SyncResult<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::HttpStatus {
            status: status.as_u16(),
            url,
            body,
        })
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> SyncResult<()> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        self.execute(self.http.post(url).json(body)).await?;
        Ok(())
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> SyncResult<()> {
        let url = self.url(path)?;
        debug!(%url, "PUT");
        self.execute(self.http.put(url).json(body)).await?;
        Ok(())
    }

    pub async fn post_multipart(&self, path: &str, upload: UploadPayload) -> SyncResult<()> {
        let url = self.url(path)?;
        debug!(%url, file = %upload.file_name, "POST multipart");
        let form = upload.into_form()?;
        self.execute(self.http.post(url).multipart(form)).await?;
        Ok(())
    }

    /// Server-side changes since `last_sync` (epoch ms), oldest first.
    ///
    /// Concurrent calls with the same `last_sync` share one request.
    pub async fn fetch_pending(&self, last_sync: i64) -> SyncResult<Vec<Value>> {
        let body = json!({ "lastSync": last_sync });
        let key = RequestKey::http("POST", PATH_PENDING, &body)?;

        let shared = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(%key, "Joining in-flight request");
                    existing.clone()
                }
                None => {
                    let client = self.clone();
                    let owner_key = key.clone();
                    let future = async move {
                        let result = client.post_for_records(PATH_PENDING, &body).await;
                        lock(&client.in_flight).remove(&owner_key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, future.clone());
                    future
                }
            }
        };

        shared.await
    }

    async fn post_for_records(&self, path: &str, body: &Value) -> SyncResult<Vec<Value>> {
        let url = self.url(path)?;
        debug!(%url, %body, "Fetching pending deltas");
        let response = self.execute(self.http.post(url).json(body)).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    /// Performs `action` against its endpoint.
    pub async fn perform(&self, action: OfflineAction, payload: &Value) -> SyncResult<()> {
        match action {
            OfflineAction::Sync => self.post_json(PATH_SYNC, payload).await,
            OfflineAction::UploadFile => {
                let upload = UploadPayload::from_value(payload)?;
                self.post_multipart(PATH_UPLOAD, upload).await
            }
            OfflineAction::UpdateProfile => self.put_json(PATH_PROFILE, payload).await,
        }
    }
}

#[async_trait]
impl ReconcileSource for ApiClient {
    async fn fetch_pending(&self, last_sync: i64) -> SyncResult<Vec<Value>> {
        ApiClient::fetch_pending(self, last_sync).await
    }
}

// =============================================================================
// Replay Handler
// =============================================================================

/// Replays queued actions through [`ApiClient::perform`].
#[derive(Clone)]
pub struct RestReplayHandler {
    api: Arc<ApiClient>,
}

impl RestReplayHandler {
    pub fn new(api: Arc<ApiClient>) -> Self {
        RestReplayHandler { api }
    }
}

#[async_trait]
impl ActionHandler for RestReplayHandler {
    async fn handle(&self, item: &OfflineQueueItem) -> SyncResult<()> {
        self.api.perform(item.action, &item.payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let client = ApiClient::new(&ApiSettings::default()).unwrap();
        assert_eq!(
            client.url(PATH_PENDING).unwrap().as_str(),
            "http://localhost:8080/api/sync/pending"
        );
    }

    #[test]
    fn test_upload_payload_shape() {
        let upload = UploadPayload::from_value(&json!({
            "fileName": "lineup.png",
            "contentType": "image/png",
            "contentBase64": "aGVsbG8=",
            "fields": {"matchId": "9"}
        }))
        .unwrap();
        assert_eq!(upload.file_name, "lineup.png");
        assert_eq!(upload.fields.get("matchId").map(String::as_str), Some("9"));
        assert!(upload.into_form().is_ok());
    }

    #[test]
    fn test_bad_upload_is_not_retryable() {
        let err = UploadPayload::from_value(&json!({"fileName": "x"})).unwrap_err();
        assert!(matches!(err, SyncError::ReplayRejected { .. }));
        assert!(!err.is_retryable());

        let upload = UploadPayload::from_value(&json!({
            "fileName": "x",
            "contentBase64": "!!!not base64"
        }))
        .unwrap();
        assert!(upload.into_form().is_err());
    }
}
