//! Per-destination-branch merge trains.
//!
//! A [`MergeTrain`] owns a FIFO queue of [`Passenger`]s for one target
//! branch and a sequential processing loop that drives each passenger
//! through its stages: mergeability check, pipeline cleanup, rebase, merge
//! trigger, pipeline wait, merge wait. One passenger at a time per train;
//! different trains run fully independent loops.
//!
//! # Failure isolation
//!
//! Every stage is individually guarded. A stage failure labels and comments
//! the passenger, drops it, and the loop moves on to the next passenger —
//! one bad MR never derails the rest of the queue. Only a failure in the
//! failure bookkeeping itself (labeling or commenting a failed passenger)
//! halts the train's loop; that path is deliberately left unguarded.

pub mod passenger;

pub use passenger::{Passenger, PassengerState, StepError};

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::gitlab::GitlabApi;
use crate::poll::{PollSettings, PollStatus, poll};
use crate::types::{MergeRequest, MrIid, Pipeline, PipelineStatus, TrainId, any_active};

/// Pipeline wait: every 10 s for up to 2 h — pipelines can sit pending for a
/// very long time, hence the generous budget and the 4-tick floor.
const PIPELINE_POLL: PollSettings =
    PollSettings::new(Duration::from_secs(10), Duration::from_secs(2 * 60 * 60), 4);

/// Quiet observations required before the pipeline wait completes.
const PIPELINE_OBSERVATIONS: u32 = 5;

/// Merge wait: every 5 s, up to 5 min, at least 4 ticks.
const MERGED_POLL: PollSettings =
    PollSettings::new(Duration::from_secs(5), Duration::from_secs(5 * 60), 4);

/// Merged observations required before the merge wait completes.
const MERGED_OBSERVATIONS: u32 = 2;

/// Mutable train state, all behind one lock.
///
/// `is_running` is the only serialization primitive in the system: it is
/// read and written exclusively under this lock, which is what guarantees
/// at most one processing loop per train.
struct TrainState {
    queue: VecDeque<Passenger>,
    active: Option<MrIid>,
    is_running: bool,
}

/// A sequential merge queue for one destination branch.
pub struct MergeTrain {
    id: TrainId,
    destination: String,
    gitlab: Arc<dyn GitlabApi>,
    delete_pipelines: bool,
    inner: Mutex<TrainState>,
}

impl MergeTrain {
    pub fn new(
        destination: impl Into<String>,
        gitlab: Arc<dyn GitlabApi>,
        delete_pipelines: bool,
    ) -> Self {
        MergeTrain {
            id: TrainId::random(),
            destination: destination.into(),
            gitlab,
            delete_pipelines,
            inner: Mutex::new(TrainState {
                queue: VecDeque::new(),
                active: None,
                is_running: false,
            }),
        }
    }

    pub fn id(&self) -> &TrainId {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// True if the MR is the active passenger or waiting in the queue.
    pub async fn is_on_board(&self, iid: MrIid) -> bool {
        let state = self.inner.lock().await;
        state.active == Some(iid) || state.queue.iter().any(|p| p.iid() == iid)
    }

    /// Number of passengers waiting (not counting the active one).
    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// True while a processing loop for this train is executing.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.is_running
    }

    /// Admits an MR and starts the processing loop if it isn't running.
    ///
    /// Idempotent on the MR's iid: an MR that is already active or queued is
    /// left untouched. Admission bookkeeping (pending label, queue-position
    /// comment, train-id label, pre-emptive pipeline cleanup) happens before
    /// the loop is started; errors in it propagate to the caller rather than
    /// being contained, since no stage guard covers admission.
    pub async fn add(self: Arc<Self>, mr: MergeRequest) -> Result<(), StepError> {
        let mut state = self.inner.lock().await;

        if !self.admit(&mut state, mr).await? {
            return Ok(());
        }

        if !state.is_running {
            state.is_running = true;
            tokio::spawn(Arc::clone(&self).process());
        }
        Ok(())
    }

    /// Queues a passenger and performs admission bookkeeping. Returns false
    /// (and does nothing) when the iid is already on board.
    async fn admit(&self, state: &mut TrainState, mr: MergeRequest) -> Result<bool, StepError> {
        let iid = mr.iid;
        if state.active == Some(iid) || state.queue.iter().any(|p| p.iid() == iid) {
            debug!(%iid, destination = %self.destination, "already on board, ignoring");
            return Ok(false);
        }

        state.queue.push_back(Passenger::new(mr, self.gitlab.clone()));
        let position = state.queue.len();
        let boarding_note = format!(
            "{}\n\n MR is on Position {}: {}",
            self.describe(state),
            position,
            queue_listing(&state.queue, position)
        );

        if let Some(passenger) = state.queue.back_mut() {
            passenger.set_status(PassengerState::Pending, false).await?;
            passenger.comment_quietly(&boarding_note).await?;
            passenger.set_train_id(&self.id).await?;
            info!(
                destination = %self.destination,
                passenger = %passenger,
                "new passenger"
            );
            passenger.cancel_all_pipelines(false).await?;
        }
        Ok(true)
    }

    /// The sequential processing loop: dequeues passengers in arrival order
    /// and drives each through its stages until the queue is empty.
    pub async fn process(self: Arc<Self>) {
        if let Err(err) = self.run_queue().await {
            // A failure outside the stage guards (labeling or commenting a
            // failing passenger) stops this train entirely; is_running stays
            // set so the dead train is visible and is not silently restarted.
            error!(
                train = %self.id,
                destination = %self.destination,
                error = %err,
                "train halted: failure outside stage guards"
            );
        }
    }

    async fn run_queue(&self) -> Result<(), StepError> {
        loop {
            let mut passenger = {
                let mut state = self.inner.lock().await;
                match state.queue.pop_front() {
                    Some(passenger) => {
                        state.is_running = true;
                        state.active = Some(passenger.iid());
                        passenger
                    }
                    None => {
                        state.is_running = false;
                        state.active = None;
                        return Ok(());
                    }
                }
            };

            self.drive(&mut passenger).await?;

            let mut state = self.inner.lock().await;
            state.active = None;
            debug!(train = %self.describe(&state), "passenger handled");
        }
    }

    /// Runs one passenger through the ordered stages. Returns `Ok` both on
    /// success and on a contained stage failure; `Err` only when the failure
    /// bookkeeping itself failed.
    async fn drive(&self, passenger: &mut Passenger) -> Result<(), StepError> {
        info!(
            train = %self.id,
            destination = %self.destination,
            passenger = %passenger,
            "checking passenger"
        );
        passenger.comment("Running, trying to merge.").await?;
        passenger.set_status(PassengerState::Running, false).await?;

        if let Err(err) = passenger.is_mergeable().await {
            warn!(passenger = %passenger, error = %err, "not mergeable");
            passenger
                .set_status(PassengerState::NotMergable, true)
                .await?;
            passenger
                .comment(&format!(
                    "Merge Status is: {} skipping.",
                    passenger.mr().merge_status
                ))
                .await?;
            return Ok(());
        }

        let verb = if self.delete_pipelines {
            "Deleting"
        } else {
            "Cancelling"
        };
        passenger
            .comment(&format!("{} all running pipelines.", verb))
            .await?;
        if let Err(err) = passenger.cancel_all_pipelines(self.delete_pipelines).await {
            passenger
                .set_status(PassengerState::PipelinesNotCancelable, true)
                .await?;
            passenger
                .comment(&format!(
                    "Failed to cancel pipelines, skipping this MR.\n{}",
                    err
                ))
                .await?;
            return Ok(());
        }

        passenger.comment("Rebasing & running a new pipeline.").await?;
        if let Err(err) = passenger.rebase().await {
            passenger
                .comment(&format!("Rebasing failed, skipping this MR\n\n{}", err))
                .await?;
            passenger
                .set_status(PassengerState::RebaseFailed, true)
                .await?;
            if err.is_method_not_allowed() {
                passenger
                    .comment(
                        "Failed to rebase, because there are merge-conflicts, \
                         or the pipeline has failed, skipping this MR",
                    )
                    .await?;
            }
            return Ok(());
        }

        passenger.comment("Setting merge when pipeline succeeds.").await?;
        if let Err(err) = passenger.merge().await {
            passenger
                .set_status(PassengerState::MergeFailed, true)
                .await?;
            passenger
                .comment(&format!("Merging failed, skipping this MR\n\n{}", err))
                .await?;
            if err.is_method_not_allowed() {
                passenger
                    .comment(
                        "Merge when pipeline succeeds failed, because there are \
                         merge-conflicts, or the pipeline has failed, skipping this MR",
                    )
                    .await?;
            }
            return Ok(());
        }

        passenger.comment("Waiting for pipeline to finish.").await?;
        passenger
            .set_status(PassengerState::WaitingForPipeline, false)
            .await?;
        if let Err(err) = self.await_pipelines(passenger.iid()).await {
            passenger
                .comment(&format!("Pipeline failed, skipping this MR\n{}", err))
                .await?;
            passenger
                .set_status(PassengerState::PipelineFailed, true)
                .await?;
            return Ok(());
        }

        passenger.comment("Waiting for status merged.").await?;
        passenger
            .set_status(PassengerState::WaitForMerge, false)
            .await?;
        if let Err(err) = self.await_merged(passenger.iid()).await {
            passenger
                .comment(&format!("Pipeline failed, skipping this MR\n{}", err))
                .await?;
            passenger
                .set_status(PassengerState::PipelineFailed, true)
                .await?;
            return Ok(());
        }

        passenger.comment("Successfully merged!").await?;
        passenger.set_status(PassengerState::Finished, false).await?;
        Ok(())
    }

    /// Polls the MR's pipelines until five observations have shown nothing
    /// running or pending, then fails if the settled set contains a failed
    /// pipeline.
    async fn await_pipelines(&self, iid: MrIid) -> Result<PollStatus<Vec<Pipeline>>, StepError> {
        let gitlab = self.gitlab.clone();
        let mut poll = poll(PIPELINE_POLL, move || {
            let gitlab = gitlab.clone();
            async move { gitlab.pipelines_with_fresh_status(iid).await }
        });

        let mut quiet = 0;
        loop {
            let status = poll.next().await?;
            debug!(
                %iid,
                pipelines = status.value.len(),
                "waiting for MR pipelines"
            );
            if !any_active(&status.value) {
                quiet += 1;
                if quiet == PIPELINE_OBSERVATIONS {
                    if status
                        .value
                        .iter()
                        .any(|p| p.status == PipelineStatus::Failed)
                    {
                        return Err(StepError::PipelineFailed);
                    }
                    return Ok(status);
                }
            }
        }
    }

    /// Polls the MR until two observations have shown it merged.
    async fn await_merged(&self, iid: MrIid) -> Result<PollStatus<MergeRequest>, StepError> {
        let gitlab = self.gitlab.clone();
        let mut poll = poll(MERGED_POLL, move || {
            let gitlab = gitlab.clone();
            async move { gitlab.merge_request(iid).await }
        });

        let mut merged = 0;
        loop {
            let status = poll.next().await?;
            debug!(mr = %status.value, "waiting for status merged");
            if status.value.state == crate::types::MrState::Merged {
                merged += 1;
                if merged == MERGED_OBSERVATIONS {
                    return Ok(status);
                }
            }
        }
    }

    fn describe(&self, state: &TrainState) -> String {
        let running = if state.is_running {
            "[running]"
        } else {
            "[waiting]"
        };
        let active = match state.active {
            Some(iid) => iid.to_string(),
            None => "none".to_string(),
        };
        format!(
            "Train {} {} with destination {} and {} in queue, active MR: {}",
            running,
            self.id,
            self.destination,
            state.queue.len(),
            active
        )
    }
}

impl std::fmt::Debug for MergeTrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeTrain")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Renders the queue for the boarding comment, bolding the newcomer.
fn queue_listing(queue: &VecDeque<Passenger>, newcomer_position: usize) -> String {
    let mut text = String::new();
    for (index, passenger) in queue.iter().enumerate() {
        let line = if index + 1 == newcomer_position {
            format!("\n\n{}) **{}**", index + 1, passenger)
        } else {
            format!("\n\n{}) {}", index + 1, passenger)
        };
        text.push_str(&line);
    }
    text
}

/// Orders MRs by their `merge_train_position/<n>` label: positioned MRs
/// first, by ascending position; unpositioned (or unparseable) ones last.
///
/// Not wired into the queue — order there is pure arrival order. This
/// comparator exists for operators experimenting with explicit positions;
/// whether it should drive admission order is an open question.
pub fn position_label_order(a: &MergeRequest, b: &MergeRequest) -> Ordering {
    let a_pos = position_label(a);
    let b_pos = position_label(b);
    match (a_pos, b_pos) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a_num), Some(b_num)) => a_num.cmp(&b_num),
    }
}

fn position_label(mr: &MergeRequest) -> Option<u64> {
    mr.labels
        .iter()
        .find_map(|label| label.strip_prefix("merge_train_position/"))
        .and_then(|suffix| suffix.parse().ok())
}
