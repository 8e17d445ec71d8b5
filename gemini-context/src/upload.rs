#![doc = "Gemini File API client: implements the core `RemoteClient` contract and the conversation backend over HTTP."]
//
//! # GeminiClient
//!
//! Bridges the transport-agnostic [`RemoteClient`] trait from
//! `gemini-context-core` to the service's REST endpoints:
//!
//! - `store`: resumable upload (`POST /upload/v1beta/files`, start, then upload + finalize)
//! - `measure`: `POST /v1beta/{model}:countTokens` with the file as the only part
//! - `delete`: `DELETE /v1beta/{name}`
//! - `list`: `GET /v1beta/files`, following `nextPageToken`
//! - [`ChatBackend::generate`]: `POST /v1beta/{model}:generateContent`
//!
//! ## Client Usage
//!
//! Construct with [`GeminiClient::new_from_env`] (reads `GEMINI_API_KEY`, `.env` supported).
//! The key travels in the `x-goog-api-key` header. Every request is bounded by the
//! configured timeout.
//!
//! ## Errors
//!
//! HTTP failures are mapped onto [`RemoteError`] by [`classify_status`] and
//! [`classify_transport`], so the core retry layer can tell what to retry.

use std::env;

use async_trait::async_trait;
use gemini_context_core::contract::{Handle, RemoteClient, RemoteError, UnitCount};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chat::{ChatBackend, Part, Turn};
use crate::load_config::RemoteSection;

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const LIST_PAGE_SIZE: u32 = 100;

pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        remote: &RemoteSection,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let http = Client::builder()
            .timeout(remote.request_timeout())
            .build()
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to build HTTP client");
                e
            })?;
        tracing::info!(
            api_key_set = !api_key.is_empty(),
            base_url = %remote.base_url,
            model = %remote.model,
            timeout_secs = remote.request_timeout_secs,
            "Initialized GeminiClient"
        );
        Ok(GeminiClient {
            http,
            api_key,
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            model: remote.model.clone(),
        })
    }

    pub fn new_from_env(
        remote: &RemoteSection,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok(); // loads environment variables from .env if present
        match env::var("GEMINI_API_KEY") {
            Ok(api_key) if !api_key.trim().is_empty() => Self::new(api_key, remote),
            Ok(_) => {
                tracing::error!("GEMINI_API_KEY is empty");
                Err("GEMINI_API_KEY is empty".into())
            }
            Err(e) => {
                tracing::error!(error = ?e, "GEMINI_API_KEY missing in environment");
                Err(format!("GEMINI_API_KEY missing in environment: {e}").into())
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn model_url(&self, method: &str) -> String {
        self.url(&format!("v1beta/{}:{method}", self.model))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = checked(request.header(API_KEY_HEADER, &self.api_key).send().await)
            .await?;
        response.json::<T>().await.map_err(classify_transport)
    }
}

/// Map a non-success status onto the retry taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = format!("{status}: {}", body.trim());
    if status == StatusCode::REQUEST_TIMEOUT {
        RemoteError::Timeout(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RemoteError::Transient(message)
    } else {
        RemoteError::Permanent(message)
    }
}

/// Map a transport-level failure onto the retry taxonomy.
pub fn classify_transport(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout(e.to_string())
    } else if e.is_decode() || e.is_builder() {
        RemoteError::Permanent(e.to_string())
    } else {
        RemoteError::Transient(e.to_string())
    }
}

async fn checked(sent: Result<Response, reqwest::Error>) -> Result<Response, RemoteError> {
    let response = sent.map_err(classify_transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    uri: String,
}

impl From<ApiFile> for Handle {
    fn from(file: ApiFile) -> Self {
        Handle {
            id: file.name,
            uri: file.uri,
            display_name: file.display_name,
            mime_type: file.mime_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: ApiFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<ApiFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    #[serde(default)]
    total_tokens: UnitCount,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: &'a [Turn],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl RemoteClient for GeminiClient {
    async fn store(
        &self,
        content: &[u8],
        display_name: &str,
        mime_type: &str,
    ) -> Result<Handle, RemoteError> {
        tracing::debug!(
            file = display_name,
            bytes = content.len(),
            "Starting resumable upload"
        );
        let start = self
            .http
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", content.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "displayName": display_name } }))
            .send()
            .await;
        let start = checked(start).await?;
        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                tracing::error!(file = display_name, "Upload start response has no upload URL");
                RemoteError::Transient("upload start response has no upload URL".into())
            })?;

        let uploaded: UploadResponse = self
            .send_json(
                self.http
                    .post(upload_url)
                    .header("X-Goog-Upload-Offset", "0")
                    .header("X-Goog-Upload-Command", "upload, finalize")
                    .body(content.to_vec()),
            )
            .await?;
        let handle = Handle::from(uploaded.file);
        tracing::info!(file = display_name, handle = %handle.id, "Uploaded file");
        Ok(handle)
    }

    async fn measure(&self, handle: &Handle) -> Result<UnitCount, RemoteError> {
        let body = json!({
            "contents": [Turn::user(vec![Part::from(handle)])]
        });
        let counted: CountTokensResponse = self
            .send_json(self.http.post(self.model_url("countTokens")).json(&body))
            .await?;
        tracing::debug!(handle = %handle.id, tokens = counted.total_tokens, "Counted tokens");
        Ok(counted.total_tokens)
    }

    async fn delete(&self, handle: &Handle) -> Result<(), RemoteError> {
        let sent = self
            .http
            .delete(self.url(&format!("v1beta/{}", handle.id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await;
        checked(sent).await?;
        tracing::debug!(handle = %handle.id, "Deleted remote file");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Handle>, RemoteError> {
        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(self.url("v1beta/files"))
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListResponse = self.send_json(request).await?;
            handles.extend(page.files.into_iter().map(Handle::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        tracing::info!(count = handles.len(), "Listed remote files");
        Ok(handles)
    }
}

#[async_trait]
impl ChatBackend for GeminiClient {
    async fn generate(&self, contents: &[Turn]) -> Result<String, RemoteError> {
        let response: GenerateResponse = self
            .send_json(
                self.http
                    .post(self.model_url("generateContent"))
                    .json(&GenerateRequest { contents }),
            )
            .await?;
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            tracing::warn!("Model returned no text");
            return Err(RemoteError::Permanent("model returned no text".into()));
        }
        Ok(text)
    }
}
