//! A merge request riding a train: scheduling state, the running comment
//! thread, and the step operations the train loop drives it through.
//!
//! A `Passenger` never advances its own state machine — every transition is
//! made by [`MergeTrain::process`](super::MergeTrain::process) calling the
//! operations below in order. State is made durable exclusively through MR
//! labels (`merge_train/<state>`), written read-modify-write against a fresh
//! fetch so concurrent external label edits are not clobbered wholesale.
//! (There is no optimistic-concurrency token: an external edit racing the
//! fetch-then-write window can still be lost. Accepted.)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::gitlab::{ApiError, GitlabApi, MergeRequestUpdate};
use crate::poll::{PollError, PollSettings, PollStatus, poll};
use crate::types::{MergeRequest, MergeStatus, MrIid, NoteId, Pipeline, TrainId, any_active};

/// Label prefix for the durable passenger state.
const STATE_LABEL_PREFIX: &str = "merge_train/";

/// Label prefix for the train identity.
const TRAIN_ID_LABEL_PREFIX: &str = "merge_train_id/";

/// The bare trigger label, removed again when a passenger fails so the MR is
/// not rediscovered and re-boarded in its failed state.
const TRIGGER_LABEL: &str = "merge_train";

/// Mergeability check: every 5 s, up to 5 min, at least 2 ticks.
const MERGEABLE_POLL: PollSettings =
    PollSettings::new(Duration::from_secs(5), Duration::from_secs(5 * 60), 2);

/// Mergeability observations required before the check passes.
const MERGEABLE_OBSERVATIONS: u32 = 3;

/// Pipeline cleanup: every 15 s, up to 2 min, at least 1 tick.
const CANCEL_POLL: PollSettings =
    PollSettings::new(Duration::from_secs(15), Duration::from_secs(2 * 60), 1);

/// Rebase wait: every 5 s, up to 10 min, at least 2 ticks.
const REBASE_POLL: PollSettings =
    PollSettings::new(Duration::from_secs(5), Duration::from_secs(10 * 60), 2);

/// Observations with the rebase settled before the step completes.
const REBASE_OBSERVATIONS: u32 = 3;

/// Scheduling state of a passenger.
///
/// The `Display` form is exactly the durable label suffix, so variant
/// spellings here are wire format, not style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassengerState {
    Created,
    Pending,
    Que,
    Running,
    WaitingForPipeline,
    WaitForMerge,
    Finished,
    Failed,
    NotMergable,
    PipelinesNotCancelable,
    RebaseFailed,
    MergeFailed,
    PipelineFailed,
}

impl PassengerState {
    /// The full label carrying this state.
    pub fn label(self) -> String {
        format!("{}{}", STATE_LABEL_PREFIX, self)
    }
}

impl fmt::Display for PassengerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassengerState::Created => "created",
            PassengerState::Pending => "pending",
            PassengerState::Que => "que",
            PassengerState::Running => "running",
            PassengerState::WaitingForPipeline => "waiting_for_pipeline",
            PassengerState::WaitForMerge => "wait_for_merge",
            PassengerState::Finished => "finished",
            PassengerState::Failed => "failed",
            PassengerState::NotMergable => "not_mergable",
            PassengerState::PipelinesNotCancelable => "pipelines_not_cancelable",
            PassengerState::RebaseFailed => "rebase_failed",
            PassengerState::MergeFailed => "merge_failed",
            PassengerState::PipelineFailed => "pipeline_failed",
        };
        write!(f, "{}", s)
    }
}

/// A failure inside a passenger step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Poll(#[from] PollError<ApiError>),

    #[error("merge status is {0}")]
    NotMergeable(MergeStatus),

    #[error("rebase failed: {0}")]
    Rebase(String),

    #[error("the pipeline failed")]
    PipelineFailed,
}

impl StepError {
    /// True if the underlying cause was HTTP 405 — GitLab's answer when a
    /// rebase or merge is blocked by merge conflicts or a failed pipeline.
    pub fn is_method_not_allowed(&self) -> bool {
        match self {
            StepError::Api(e) => e.is_method_not_allowed(),
            StepError::Poll(PollError::Fetch(e)) => e.is_method_not_allowed(),
            _ => false,
        }
    }
}

/// A merge request with its in-train scheduling state.
pub struct Passenger {
    mr: MergeRequest,
    state: PassengerState,
    comment_id: Option<NoteId>,
    gitlab: Arc<dyn GitlabApi>,
}

impl Passenger {
    pub fn new(mr: MergeRequest, gitlab: Arc<dyn GitlabApi>) -> Self {
        Passenger {
            mr,
            state: PassengerState::Created,
            comment_id: None,
            gitlab,
        }
    }

    pub fn iid(&self) -> MrIid {
        self.mr.iid
    }

    pub fn state(&self) -> PassengerState {
        self.state
    }

    /// The last seen snapshot of the MR (refreshed by `set_status`).
    pub fn mr(&self) -> &MergeRequest {
        &self.mr
    }

    /// Re-fetches the MR, swaps every `merge_train/*` label for the one
    /// carrying `status`, and writes the MR back.
    ///
    /// With `failed` the `merge_train/failed` marker is added as well and the
    /// bare trigger label is removed, so the station stops rediscovering the
    /// MR. This is the sole mechanism making scheduling state durable and
    /// externally visible.
    pub async fn set_status(
        &mut self,
        status: PassengerState,
        failed: bool,
    ) -> Result<(), StepError> {
        let mut fresh = self.gitlab.merge_request(self.iid()).await?;
        fresh
            .labels
            .retain(|label| !label.starts_with(STATE_LABEL_PREFIX));
        fresh.labels.push(status.label());
        self.state = status;

        if failed {
            fresh.labels.push(PassengerState::Failed.label());
            self.state = PassengerState::Failed;
            fresh.labels.retain(|label| label != TRIGGER_LABEL);
        }

        let update = MergeRequestUpdate {
            labels: fresh.labels,
        };
        self.mr = self
            .gitlab
            .update_merge_request(self.iid(), &update)
            .await?;
        Ok(())
    }

    /// Writes the owning train's identity as a `merge_train_id/<id>` label.
    /// Written for operators; never read back by the scheduler.
    pub async fn set_train_id(&mut self, train_id: &TrainId) -> Result<(), StepError> {
        let mut fresh = self.gitlab.merge_request(self.iid()).await?;
        fresh
            .labels
            .retain(|label| !label.starts_with(TRAIN_ID_LABEL_PREFIX));
        fresh
            .labels
            .push(format!("{}{}", TRAIN_ID_LABEL_PREFIX, train_id));

        let update = MergeRequestUpdate {
            labels: fresh.labels,
        };
        self.mr = self
            .gitlab
            .update_merge_request(self.iid(), &update)
            .await?;
        Ok(())
    }

    /// Appends to the passenger's single running comment thread, creating it
    /// on first use. Also logs the text.
    pub async fn comment(&mut self, text: &str) -> Result<(), StepError> {
        info!(mr = %self.mr, "{}", text);
        self.comment_quietly(text).await
    }

    /// Like [`comment`](Self::comment), without the log line.
    pub async fn comment_quietly(&mut self, text: &str) -> Result<(), StepError> {
        match self.comment_id {
            Some(id) => {
                let existing = self.gitlab.note(self.iid(), id).await?;
                let body = format!("{}\n- {}", existing.body, text);
                let updated = self.gitlab.update_note(self.iid(), id, &body).await?;
                self.comment_id = Some(updated.id);
            }
            None => {
                let created = self.gitlab.create_note(self.iid(), text).await?;
                self.comment_id = Some(created.id);
            }
        }
        Ok(())
    }

    /// Polls the MR until three observations in a row have shown it
    /// mergeable; any observation with another merge status fails the whole
    /// check immediately.
    pub async fn is_mergeable(&self) -> Result<PollStatus<MergeRequest>, StepError> {
        let gitlab = self.gitlab.clone();
        let iid = self.iid();
        let mut poll = poll(MERGEABLE_POLL, move || {
            let gitlab = gitlab.clone();
            async move { gitlab.merge_request(iid).await }
        });

        let mut observed = 0;
        loop {
            let status = poll.next().await?;
            debug!(mr = %status.value, "running, trying to merge");
            if status.value.merge_status != MergeStatus::CanBeMerged {
                return Err(StepError::NotMergeable(status.value.merge_status));
            }
            observed += 1;
            if observed == MERGEABLE_OBSERVATIONS {
                return Ok(status);
            }
        }
    }

    /// Cancels (or deletes) every cancelable pipeline of this MR on every
    /// poll tick until an observation shows nothing running or pending.
    ///
    /// The observation is fetched before that tick's cancel pass, so
    /// completion always rests on a post-cancel re-check by the next tick.
    pub async fn cancel_all_pipelines(
        &mut self,
        delete: bool,
    ) -> Result<PollStatus<Vec<Pipeline>>, StepError> {
        let gitlab = self.gitlab.clone();
        let iid = self.iid();
        let mut poll = poll(CANCEL_POLL, move || {
            let gitlab = gitlab.clone();
            async move { gitlab.pipelines_with_fresh_status(iid).await }
        });

        loop {
            let status = poll.next().await?;
            self.cancel_pipelines_by_status(delete).await?;
            debug!(
                pipelines = %format_pipelines(&status.value),
                "all MR pipelines"
            );
            if !any_active(&status.value) {
                return Ok(status);
            }
        }
    }

    /// One cancel pass over a fresh pipeline listing.
    async fn cancel_pipelines_by_status(&mut self, delete: bool) -> Result<(), StepError> {
        let pipelines = self.gitlab.pipelines_for_mr(self.iid()).await?;
        for pipeline in pipelines {
            if !pipeline.status.is_cancelable() {
                continue;
            }
            if delete {
                self.comment(&format!("Deleting: {}", pipeline.web_url))
                    .await?;
                self.gitlab.delete_pipeline(pipeline.id).await?;
            } else {
                self.comment(&format!("Cancelling: {}", pipeline.web_url))
                    .await?;
                self.gitlab.cancel_pipeline(pipeline.id).await?;
            }
        }
        Ok(())
    }

    /// Triggers a rebase, then polls until three observations have shown the
    /// rebase settled. A non-empty `merge_error` at any tick fails the step
    /// with that error.
    pub async fn rebase(&self) -> Result<PollStatus<MergeRequest>, StepError> {
        self.gitlab.rebase(self.iid()).await?;

        let gitlab = self.gitlab.clone();
        let iid = self.iid();
        let mut poll = poll(REBASE_POLL, move || {
            let gitlab = gitlab.clone();
            async move { gitlab.merge_request(iid).await }
        });
        let mut settled = 0;
        loop {
            let status = poll.next().await?;
            debug!(mr = %status.value, "waiting for rebase");
            if let Some(error) = &status.value.merge_error {
                if !error.is_empty() {
                    return Err(StepError::Rebase(error.clone()));
                }
            }
            if !status.value.rebase_in_progress {
                settled += 1;
                if settled == REBASE_OBSERVATIONS {
                    return Ok(status);
                }
            }
        }
    }

    /// Sets "merge when pipeline succeeds" with source-branch removal.
    /// Fire-and-forget: waiting for the merge is the train's concern.
    pub async fn merge(&self) -> Result<(), StepError> {
        self.gitlab
            .merge_when_pipeline_succeeds(self.iid())
            .await
            .map_err(StepError::from)
    }

}

impl fmt::Display for Passenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.mr.title, self.mr.web_url)
    }
}

/// Joins pipeline one-liners for a log field.
fn format_pipelines(pipelines: &[Pipeline]) -> String {
    pipelines
        .iter()
        .map(Pipeline::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
