//! Reqwest-based GitLab client, scoped to a single project.
//!
//! Every method issues one logical request through the fixed-delay retry
//! wrapper. Success is any 2xx/3xx status; the body is parsed as JSON when
//! the caller expects one, and ignored (empty or not) when it doesn't.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{MergeRequest, MrIid, NoteId, Pipeline, PipelineId, ProjectId};

use super::error::{ApiError, RequestError};
use super::retry::{RetryConfig, retry_with_delay};
use super::{GitlabApi, MergeRequestFilter, MergeRequestUpdate, Note};

/// API prefix shared by all endpoints.
const API_BASE: &str = "/api/v4";

/// Per-attempt request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A GitLab API client scoped to a specific project.
#[derive(Clone)]
pub struct GitlabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    project: ProjectId,
    retry: RetryConfig,
}

impl GitlabClient {
    /// Creates a client for `base_url` (scheme and host, no trailing slash,
    /// e.g. `https://gitlab.example.com`).
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        project: ProjectId,
        retry: RetryConfig,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(GitlabClient {
            http,
            base_url: base_url.into(),
            token: token.into(),
            project,
            retry,
        })
    }

    /// Returns the project this client is scoped to.
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_BASE, path)
    }

    fn project_path(&self, rest: &str) -> String {
        format!("/projects/{}{}", self.project, rest)
    }

    /// One attempt: send, enforce the 2xx/3xx success window, return the
    /// raw body text.
    async fn attempt(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, RequestError> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("Private-Token", &self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() || status.is_redirection() {
            Ok(text)
        } else {
            Err(RequestError::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }

    /// A retried request whose response body is parsed as JSON.
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        debug!(%path, method = %method, "gitlab request");
        retry_with_delay(self.retry, || {
            let method = method.clone();
            let path = &path;
            let body = body.as_ref();
            async move {
                let text = self.attempt(method, path, body).await?;
                serde_json::from_str(&text).map_err(RequestError::from)
            }
        })
        .await
    }

    /// A retried request whose response body is ignored.
    async fn request_ignore_body(
        &self,
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
    ) -> Result<(), ApiError> {
        debug!(%path, method = %method, "gitlab request");
        retry_with_delay(self.retry, || {
            let method = method.clone();
            let path = &path;
            let body = body.as_ref();
            async move {
                self.attempt(method, path, body).await?;
                Ok(())
            }
        })
        .await
    }
}

impl std::fmt::Debug for GitlabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitlabClient")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GitlabApi for GitlabClient {
    async fn merge_request(&self, iid: MrIid) -> Result<MergeRequest, ApiError> {
        self.request_json(
            Method::GET,
            self.project_path(&format!(
                "/merge_requests/{}?include_rebase_in_progress=true",
                iid.0
            )),
            None,
        )
        .await
    }

    async fn update_merge_request(
        &self,
        iid: MrIid,
        update: &MergeRequestUpdate,
    ) -> Result<MergeRequest, ApiError> {
        let body = serde_json::to_value(update).expect("update serialization is infallible");
        self.request_json(
            Method::PUT,
            self.project_path(&format!("/merge_requests/{}", iid.0)),
            Some(body),
        )
        .await
    }

    async fn merge_requests(
        &self,
        filter: &MergeRequestFilter,
    ) -> Result<Vec<MergeRequest>, ApiError> {
        self.request_json(
            Method::GET,
            self.project_path(&format!(
                "/merge_requests?labels={}&scope=all&state={}&wip={}",
                filter.label, filter.state, filter.wip
            )),
            None,
        )
        .await
    }

    async fn pipelines_for_mr(&self, iid: MrIid) -> Result<Vec<Pipeline>, ApiError> {
        self.request_json(
            Method::GET,
            self.project_path(&format!("/merge_requests/{}/pipelines", iid.0)),
            None,
        )
        .await
    }

    async fn pipeline(&self, id: PipelineId) -> Result<Pipeline, ApiError> {
        self.request_json(
            Method::GET,
            self.project_path(&format!("/pipelines/{}", id)),
            None,
        )
        .await
    }

    async fn cancel_pipeline(&self, id: PipelineId) -> Result<(), ApiError> {
        self.request_ignore_body(
            Method::POST,
            self.project_path(&format!("/pipelines/{}/cancel", id)),
            None,
        )
        .await
    }

    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), ApiError> {
        self.request_ignore_body(
            Method::DELETE,
            self.project_path(&format!("/pipelines/{}", id)),
            None,
        )
        .await
    }

    async fn create_note(&self, iid: MrIid, body: &str) -> Result<Note, ApiError> {
        self.request_json(
            Method::POST,
            self.project_path(&format!("/merge_requests/{}/notes", iid.0)),
            Some(serde_json::json!({ "body": body })),
        )
        .await
    }

    async fn note(&self, iid: MrIid, id: NoteId) -> Result<Note, ApiError> {
        self.request_json(
            Method::GET,
            self.project_path(&format!("/merge_requests/{}/notes/{}", iid.0, id)),
            None,
        )
        .await
    }

    async fn update_note(&self, iid: MrIid, id: NoteId, body: &str) -> Result<Note, ApiError> {
        self.request_json(
            Method::PUT,
            self.project_path(&format!("/merge_requests/{}/notes/{}", iid.0, id)),
            Some(serde_json::json!({ "body": body })),
        )
        .await
    }

    async fn rebase(&self, iid: MrIid) -> Result<(), ApiError> {
        self.request_ignore_body(
            Method::PUT,
            self.project_path(&format!("/merge_requests/{}/rebase", iid.0)),
            None,
        )
        .await
    }

    async fn merge_when_pipeline_succeeds(&self, iid: MrIid) -> Result<(), ApiError> {
        self.request_ignore_body(
            Method::PUT,
            self.project_path(&format!(
                "/merge_requests/{}/merge?merge_when_pipeline_succeeds=true&should_remove_source_branch=true",
                iid.0
            )),
            None,
        )
        .await
    }
}
