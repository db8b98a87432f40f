//! GitLab API surface.
//!
//! [`GitlabApi`] is the seam between the scheduling core and the remote
//! system: everything the core does to the outside world goes through this
//! trait, which makes the train/passenger logic testable against an
//! in-memory fake. [`client::GitlabClient`] is the production
//! implementation (reqwest, project-scoped, retried).

pub mod client;
pub mod error;
pub mod retry;

pub use client::GitlabClient;
pub use error::{ApiError, RequestError};
pub use retry::{RetryConfig, retry_with_delay};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};

use crate::types::{MergeRequest, MrIid, NoteId, Pipeline, PipelineId};

/// A note (comment) on a merge request — only the fields the running
/// comment thread needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub body: String,
}

/// Fields written back to a merge request.
///
/// Only labels are ever mutated by the core; GitLab's update endpoint takes
/// labels as a comma-separated string, so they serialize that way.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRequestUpdate {
    #[serde(serialize_with = "join_labels")]
    pub labels: Vec<String>,
}

fn join_labels<S>(labels: &Vec<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&labels.join(","))
}

/// Filter for listing merge requests.
#[derive(Debug, Clone)]
pub struct MergeRequestFilter {
    pub label: String,
    pub state: String,
    pub wip: String,
}

impl MergeRequestFilter {
    /// Open, non-WIP MRs carrying the given trigger label.
    pub fn open_with_label(label: impl Into<String>) -> Self {
        MergeRequestFilter {
            label: label.into(),
            state: "opened".to_string(),
            wip: "no".to_string(),
        }
    }
}

/// Everything the scheduling core needs from GitLab.
///
/// All calls are idempotent at the application level except
/// [`create_note`](GitlabApi::create_note), which opens a new comment
/// thread on every call.
#[async_trait]
pub trait GitlabApi: Send + Sync {
    /// Fetches one MR, including `rebase_in_progress`.
    async fn merge_request(&self, iid: MrIid) -> Result<MergeRequest, ApiError>;

    /// Writes mutable fields (labels) back to an MR, returning the updated MR.
    async fn update_merge_request(
        &self,
        iid: MrIid,
        update: &MergeRequestUpdate,
    ) -> Result<MergeRequest, ApiError>;

    /// Lists MRs matching a label/state/WIP filter across the project.
    async fn merge_requests(
        &self,
        filter: &MergeRequestFilter,
    ) -> Result<Vec<MergeRequest>, ApiError>;

    /// Lists the pipelines attached to an MR.
    async fn pipelines_for_mr(&self, iid: MrIid) -> Result<Vec<Pipeline>, ApiError>;

    /// Fetches one pipeline by ID.
    async fn pipeline(&self, id: PipelineId) -> Result<Pipeline, ApiError>;

    /// Cancels a pipeline.
    async fn cancel_pipeline(&self, id: PipelineId) -> Result<(), ApiError>;

    /// Deletes a pipeline.
    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), ApiError>;

    /// Creates a new note on an MR.
    async fn create_note(&self, iid: MrIid, body: &str) -> Result<Note, ApiError>;

    /// Fetches an existing note.
    async fn note(&self, iid: MrIid, id: NoteId) -> Result<Note, ApiError>;

    /// Replaces a note's body.
    async fn update_note(&self, iid: MrIid, id: NoteId, body: &str) -> Result<Note, ApiError>;

    /// Triggers a rebase of the MR onto its target branch.
    async fn rebase(&self, iid: MrIid) -> Result<(), ApiError>;

    /// Sets "merge when pipeline succeeds" with source-branch removal.
    async fn merge_when_pipeline_succeeds(&self, iid: MrIid) -> Result<(), ApiError>;

    /// Lists an MR's pipelines, then re-fetches each one individually.
    ///
    /// The list endpoint can serve stale statuses; the per-pipeline fetch
    /// is authoritative, which matters when deciding whether anything is
    /// still running.
    async fn pipelines_with_fresh_status(&self, iid: MrIid) -> Result<Vec<Pipeline>, ApiError> {
        let listed = self.pipelines_for_mr(iid).await?;
        let mut fresh = Vec::with_capacity(listed.len());
        for pipeline in listed {
            fresh.push(self.pipeline(pipeline.id).await?);
        }
        Ok(fresh)
    }
}
