//! REST client for the TestDeck backend.
//!
//! Wraps the conversion, single-case execution and case-result endpoints.
//! Every successful backend response uses the envelope
//! `{"code": 0, "message": "...", "data": ...}`; the `data` member is
//! unwrapped before decoding.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use testdeck_core::conversion::JobStatusResponse;
use testdeck_core::remote::{
    ExecuteItemResponse, ItemExecutor, JobStatusSource, RemoteError, ResultRecord, ResultStore,
};
use testdeck_core::types::{DbId, TaskRef};

/// Default base URL of the backend API.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// Default per-request timeout. Script execution on the remote executor can
/// take up to two minutes for web cases.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for one TestDeck backend.
#[derive(Clone)]
pub struct TestDeckApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl TestDeckApi {
    /// Create a client with the default request timeout.
    ///
    /// * `api_url` - Base URL including the version prefix, e.g.
    ///   `http://host:8080/api/v1`.
    pub fn new(api_url: impl Into<String>) -> Result<Self, RemoteError> {
        Self::with_timeout(api_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            token: None,
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- endpoints ----

    /// `POST /raw-documents/{id}/convert`
    pub async fn start_conversion(&self, document_id: DbId) -> Result<(), RemoteError> {
        let response = self
            .request(Method::POST, &format!("/raw-documents/{document_id}/convert"))
            .send()
            .await
            .map_err(transport_error)?;
        Self::check_status(response).await
    }

    /// `GET /raw-documents/{id}/convert-status`
    pub async fn convert_status(&self, document_id: DbId) -> Result<JobStatusResponse, RemoteError> {
        let response = self
            .request(
                Method::GET,
                &format!("/raw-documents/{document_id}/convert-status"),
            )
            .send()
            .await
            .map_err(transport_error)?;
        Self::parse_response(response).await
    }

    /// `POST /projects/{project_id}/execution-tasks/{task_uuid}/cases/{id}/execute`
    pub async fn execute_case(
        &self,
        task: TaskRef,
        case_result_id: DbId,
    ) -> Result<ExecuteItemResponse, RemoteError> {
        let path = format!(
            "/projects/{}/execution-tasks/{}/cases/{case_result_id}/execute",
            task.project_id, task.task_uuid
        );
        let response = self
            .request(Method::POST, &path)
            .send()
            .await
            .map_err(transport_error)?;
        Self::parse_response(response).await
    }

    /// `PATCH /execution-tasks/{task_uuid}/case-results`
    pub async fn save_case_results(
        &self,
        task: TaskRef,
        records: &[ResultRecord],
    ) -> Result<(), RemoteError> {
        let response = self
            .request(
                Method::PATCH,
                &format!("/execution-tasks/{}/case-results", task.task_uuid),
            )
            .json(records)
            .send()
            .await
            .map_err(transport_error)?;
        Self::check_status(response).await
    }

    /// `GET /execution-tasks/{task_uuid}/case-results`
    pub async fn case_results(&self, task: TaskRef) -> Result<Vec<ResultRecord>, RemoteError> {
        let response = self
            .request(
                Method::GET,
                &format!("/execution-tasks/{}/case-results", task.task_uuid),
            )
            .send()
            .await
            .map_err(transport_error)?;
        let records: Option<Vec<ResultRecord>> = Self::parse_response(response).await?;
        Ok(records.unwrap_or_default())
    }

    // ---- private helpers ----

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.api_url));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the response
    /// unchanged on success, or a [`RemoteError::Api`] containing the
    /// status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a successful response body, unwrapping the envelope.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let response = Self::ensure_success(response).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        unwrap_envelope(body)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), RemoteError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Decode `data` from a `{code, message, data}` envelope, or the whole body
/// when it carries no envelope.
pub fn unwrap_envelope<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, RemoteError> {
    let payload = match body {
        serde_json::Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Transport(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Remote trait bindings
// ---------------------------------------------------------------------------

impl JobStatusSource for TestDeckApi {
    async fn start_conversion(&self, job_id: DbId) -> Result<(), RemoteError> {
        TestDeckApi::start_conversion(self, job_id).await
    }

    async fn fetch_status(&self, job_id: DbId) -> Result<JobStatusResponse, RemoteError> {
        self.convert_status(job_id).await
    }
}

impl ItemExecutor for TestDeckApi {
    async fn execute_item(
        &self,
        task: TaskRef,
        item_id: DbId,
    ) -> Result<ExecuteItemResponse, RemoteError> {
        tracing::debug!(task = %task, item_id, "Executing case remotely");
        self.execute_case(task, item_id).await
    }
}

impl ResultStore for TestDeckApi {
    async fn save_results(
        &self,
        task: TaskRef,
        records: Vec<ResultRecord>,
    ) -> Result<(), RemoteError> {
        self.save_case_results(task, &records).await
    }

    async fn load_results(&self, task: TaskRef) -> Result<Vec<ResultRecord>, RemoteError> {
        self.case_results(task).await
    }
}
