//! Shared test utilities: an in-memory GitLab fake and fixture builders.
//!
//! [`FakeGitlab`] implements [`GitlabApi`] against process-local state so the
//! train, passenger and station logic can be exercised end to end without a
//! network. Failure modes are scripted per test (rebase conflicts, frozen
//! pipelines, rejected merges), and every mutating call is appended to a
//! journal for ordering assertions.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gitlab::{
    ApiError, GitlabApi, MergeRequestFilter, MergeRequestUpdate, Note, RequestError,
};
use crate::types::{
    MergeRequest, MergeStatus, MrIid, MrState, NoteId, Pipeline, PipelineId, PipelineStatus,
};

/// Builds an open, mergeable MR carrying the trigger label.
pub fn mr_fixture(iid: u64, target_branch: &str) -> MergeRequest {
    MergeRequest {
        iid: MrIid(iid),
        title: format!("MR {}", iid),
        target_branch: target_branch.to_string(),
        labels: vec!["merge_train".to_string()],
        state: MrState::Opened,
        merge_status: MergeStatus::CanBeMerged,
        rebase_in_progress: false,
        merge_error: None,
        web_url: format!("http://x/mr/{}", iid),
    }
}

/// Builds a pipeline with the given status.
pub fn pipeline_fixture(id: u64, status: PipelineStatus) -> Pipeline {
    Pipeline {
        id: PipelineId(id),
        sha: format!("sha-{}", id),
        git_ref: "refs/heads/feature".to_string(),
        status,
        web_url: format!("http://x/pipelines/{}", id),
    }
}

#[derive(Default)]
struct FakeState {
    mrs: HashMap<MrIid, MergeRequest>,
    pipelines: HashMap<MrIid, Vec<Pipeline>>,
    notes: HashMap<MrIid, Vec<Note>>,
    next_note_id: u64,
    next_pipeline_id: u64,
    journal: Vec<String>,
    mr_fetches: HashMap<MrIid, u32>,
    rebase_conflicts: HashSet<MrIid>,
    merge_rejects: HashSet<MrIid>,
    spawn_pipeline_on_rebase: bool,
    frozen_pipelines: bool,
    merge_trigger_inert: bool,
}

/// An in-memory [`GitlabApi`] implementation.
pub struct FakeGitlab {
    state: Mutex<FakeState>,
}

fn http_error(status: u16, body: &str) -> ApiError {
    ApiError::RetryExhausted {
        attempts: 1,
        source: RequestError::Status {
            status,
            body: body.to_string(),
        },
    }
}

impl FakeGitlab {
    pub fn new() -> Self {
        FakeGitlab {
            state: Mutex::new(FakeState {
                next_note_id: 900,
                next_pipeline_id: 700,
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    // ─── Fixture setup ────────────────────────────────────────────────────────

    pub fn add_mr(&self, mr: MergeRequest) {
        self.lock().mrs.insert(mr.iid, mr);
    }

    pub fn add_pipeline(&self, iid: MrIid, pipeline: Pipeline) {
        self.lock().pipelines.entry(iid).or_default().push(pipeline);
    }

    pub fn set_merge_status(&self, iid: MrIid, status: MergeStatus) {
        if let Some(mr) = self.lock().mrs.get_mut(&iid) {
            mr.merge_status = status;
        }
    }

    pub fn set_merge_error(&self, iid: MrIid, error: &str) {
        if let Some(mr) = self.lock().mrs.get_mut(&iid) {
            mr.merge_error = Some(error.to_string());
        }
    }

    pub fn push_label(&self, iid: MrIid, label: &str) {
        if let Some(mr) = self.lock().mrs.get_mut(&iid) {
            mr.labels.push(label.to_string());
        }
    }

    /// The rebase endpoint answers 405 for this MR.
    pub fn set_rebase_conflict(&self, iid: MrIid) {
        self.lock().rebase_conflicts.insert(iid);
    }

    /// The merge endpoint answers 405 for this MR.
    pub fn set_merge_reject(&self, iid: MrIid) {
        self.lock().merge_rejects.insert(iid);
    }

    /// Every successful rebase spawns a fresh running pipeline, like a real
    /// instance would.
    pub fn spawn_running_pipeline_on_rebase(&self) {
        self.lock().spawn_pipeline_on_rebase = true;
    }

    /// Cancel and delete calls succeed but change nothing — the shape of a
    /// stuck runner.
    pub fn freeze_pipelines(&self) {
        self.lock().frozen_pipelines = true;
    }

    /// The merge trigger succeeds but the MR never becomes merged.
    pub fn merge_trigger_has_no_effect(&self) {
        self.lock().merge_trigger_inert = true;
    }

    // ─── Inspection ───────────────────────────────────────────────────────────

    /// A copy of the stored MR (not counted as an API fetch).
    pub fn mr(&self, iid: MrIid) -> MergeRequest {
        self.lock().mrs.get(&iid).cloned().expect("unknown MR")
    }

    pub fn labels_of(&self, iid: MrIid) -> Vec<String> {
        self.mr(iid).labels
    }

    /// Bodies of all note threads on the MR, in creation order.
    pub fn note_bodies(&self, iid: MrIid) -> Vec<String> {
        self.lock()
            .notes
            .get(&iid)
            .map(|notes| notes.iter().map(|n| n.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Every mutating call, in order ("rebase 10", "cancel_pipeline 70", ...).
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// How many times `merge_request` was fetched for this MR.
    pub fn mr_fetches(&self, iid: MrIid) -> u32 {
        self.lock().mr_fetches.get(&iid).copied().unwrap_or(0)
    }
}

impl Default for FakeGitlab {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitlabApi for FakeGitlab {
    async fn merge_request(&self, iid: MrIid) -> Result<MergeRequest, ApiError> {
        let mut state = self.lock();
        *state.mr_fetches.entry(iid).or_insert(0) += 1;
        state
            .mrs
            .get(&iid)
            .cloned()
            .ok_or_else(|| http_error(404, "404 Merge Request Not Found"))
    }

    async fn update_merge_request(
        &self,
        iid: MrIid,
        update: &MergeRequestUpdate,
    ) -> Result<MergeRequest, ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("update_mr {}", iid.0));
        let mr = state
            .mrs
            .get_mut(&iid)
            .ok_or_else(|| http_error(404, "404 Merge Request Not Found"))?;
        mr.labels = update.labels.clone();
        Ok(mr.clone())
    }

    async fn merge_requests(
        &self,
        filter: &MergeRequestFilter,
    ) -> Result<Vec<MergeRequest>, ApiError> {
        let state = self.lock();
        let mut matching: Vec<MergeRequest> = state
            .mrs
            .values()
            .filter(|mr| mr.has_label(&filter.label) && mr.state == MrState::Opened)
            .cloned()
            .collect();
        matching.sort_by_key(|mr| mr.iid.0);
        Ok(matching)
    }

    async fn pipelines_for_mr(&self, iid: MrIid) -> Result<Vec<Pipeline>, ApiError> {
        Ok(self.lock().pipelines.get(&iid).cloned().unwrap_or_default())
    }

    async fn pipeline(&self, id: PipelineId) -> Result<Pipeline, ApiError> {
        self.lock()
            .pipelines
            .values()
            .flatten()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| http_error(404, "404 Pipeline Not Found"))
    }

    async fn cancel_pipeline(&self, id: PipelineId) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("cancel_pipeline {}", id));
        if !state.frozen_pipelines {
            for pipelines in state.pipelines.values_mut() {
                for pipeline in pipelines.iter_mut().filter(|p| p.id == id) {
                    pipeline.status = PipelineStatus::Canceled;
                }
            }
        }
        Ok(())
    }

    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("delete_pipeline {}", id));
        if !state.frozen_pipelines {
            for pipelines in state.pipelines.values_mut() {
                pipelines.retain(|p| p.id != id);
            }
        }
        Ok(())
    }

    async fn create_note(&self, iid: MrIid, body: &str) -> Result<Note, ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("create_note {}", iid.0));
        let note = Note {
            id: NoteId(state.next_note_id),
            body: body.to_string(),
        };
        state.next_note_id += 1;
        state.notes.entry(iid).or_default().push(note.clone());
        Ok(note)
    }

    async fn note(&self, iid: MrIid, id: NoteId) -> Result<Note, ApiError> {
        self.lock()
            .notes
            .get(&iid)
            .and_then(|notes| notes.iter().find(|n| n.id == id))
            .cloned()
            .ok_or_else(|| http_error(404, "404 Note Not Found"))
    }

    async fn update_note(&self, iid: MrIid, id: NoteId, body: &str) -> Result<Note, ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("update_note {}", id));
        let note = state
            .notes
            .get_mut(&iid)
            .and_then(|notes| notes.iter_mut().find(|n| n.id == id))
            .ok_or_else(|| http_error(404, "404 Note Not Found"))?;
        note.body = body.to_string();
        Ok(note.clone())
    }

    async fn rebase(&self, iid: MrIid) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("rebase {}", iid.0));
        if state.rebase_conflicts.contains(&iid) {
            return Err(http_error(405, "405 Method Not Allowed"));
        }
        if state.spawn_pipeline_on_rebase {
            let pipeline = pipeline_fixture(state.next_pipeline_id, PipelineStatus::Running);
            state.next_pipeline_id += 1;
            state.pipelines.entry(iid).or_default().push(pipeline);
        }
        Ok(())
    }

    async fn merge_when_pipeline_succeeds(&self, iid: MrIid) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.journal.push(format!("merge {}", iid.0));
        if state.merge_rejects.contains(&iid) {
            return Err(http_error(405, "405 Method Not Allowed"));
        }
        if !state.merge_trigger_inert {
            if let Some(mr) = state.mrs.get_mut(&iid) {
                mr.state = MrState::Merged;
            }
        }
        Ok(())
    }
}
