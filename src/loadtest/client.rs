//! HTTP seam between the workflow and the anagram service.
//!
//! The workflow only talks to [`AnagramApi`]; [`HttpAnagramClient`] is the
//! reqwest-backed implementation used for real runs. Each method returns the
//! raw status and body of one request, or a [`RequestError`] when no response
//! arrived. Status interpretation belongs to the checks, not the client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::loadtest::config::PayloadConfig;
use crate::loadtest::error::{LoadTestError, RequestError};

/// Asynchronous submission endpoint (multipart upload).
pub const UPLOAD_PATH: &str = "/api/v1/anagrams/upload";
/// Result endpoint prefix; the task id is appended.
pub const GROUPS_PATH: &str = "/api/v1/anagrams/groups";
/// JSON group endpoint.
pub const GROUP_PATH: &str = "/api/v1/anagrams/group";

/// Result path for a task id, e.g. `/api/v1/anagrams/groups/abc-123`.
pub fn poll_path(task_id: &str) -> String {
    format!("{GROUPS_PATH}/{}", urlencoding::encode(task_id))
}

/// Status line and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The three requests one iteration issues.
#[async_trait]
pub trait AnagramApi: Send + Sync {
    /// `POST /api/v1/anagrams/upload` as multipart form data.
    async fn upload(&self, payload: &PayloadConfig) -> Result<ApiResponse, RequestError>;

    /// `GET /api/v1/anagrams/groups/{task_id}`.
    async fn poll(&self, task_id: &str) -> Result<ApiResponse, RequestError>;

    /// `POST /api/v1/anagrams/group` with a JSON body.
    async fn group(&self, payload: &PayloadConfig) -> Result<ApiResponse, RequestError>;
}

#[derive(Serialize)]
struct GroupRequest<'a> {
    words: &'a [String],
    case_sensitive: bool,
}

/// reqwest-backed [`AnagramApi`]. Cheap to share: one instance serves every VU.
#[derive(Debug, Clone)]
pub struct HttpAnagramClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAnagramClient {
    /// Builds a client with the given per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LoadTestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoadTestError::Client {
                message: e.to_string(),
            })?;
        Ok(Self::with_client(http, base_url))
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse, RequestError> {
        let response = request
            .send()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| RequestError::Body {
            message: e.to_string(),
        })?;
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl AnagramApi for HttpAnagramClient {
    async fn upload(&self, payload: &PayloadConfig) -> Result<ApiResponse, RequestError> {
        let file = reqwest::multipart::Part::bytes(payload.wordlist_file().into_bytes())
            .file_name(payload.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| RequestError::Request {
                message: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("case_sensitive", payload.case_sensitive_field());

        self.send(self.http.post(self.endpoint(UPLOAD_PATH)).multipart(form))
            .await
    }

    async fn poll(&self, task_id: &str) -> Result<ApiResponse, RequestError> {
        self.send(self.http.get(self.endpoint(&poll_path(task_id))))
            .await
    }

    async fn group(&self, payload: &PayloadConfig) -> Result<ApiResponse, RequestError> {
        let body = GroupRequest {
            words: &payload.words,
            case_sensitive: payload.case_sensitive,
        };
        self.send(self.http.post(self.endpoint(GROUP_PATH)).json(&body))
            .await
    }
}
