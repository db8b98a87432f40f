//! The railway station: discovery and dispatch.
//!
//! The station finds merge requests carrying the trigger label, groups them
//! by destination branch, and forwards each to that branch's train —
//! creating the train on first sight of a branch. Trains are never removed;
//! an emptied train stays around for the life of the process.
//!
//! A station is an explicitly constructed object with no ambient singleton:
//! hand it around by `Arc`, and as many stations as you like can coexist
//! (the tests rely on this).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::gitlab::{GitlabApi, MergeRequestFilter};
use crate::train::{MergeTrain, StepError};
use crate::types::MrIid;

/// Maps destination branches to their merge trains.
pub struct RailwayStation {
    gitlab: Arc<dyn GitlabApi>,
    train_label: String,
    delete_pipelines: bool,
    trains: Mutex<HashMap<String, Arc<MergeTrain>>>,
}

impl RailwayStation {
    pub fn new(
        gitlab: Arc<dyn GitlabApi>,
        train_label: impl Into<String>,
        delete_pipelines: bool,
    ) -> Self {
        RailwayStation {
            gitlab,
            train_label: train_label.into(),
            delete_pipelines,
            trains: Mutex::new(HashMap::new()),
        }
    }

    /// The label that puts an MR on a train.
    pub fn train_label(&self) -> &str {
        &self.train_label
    }

    /// Scans for open, non-WIP MRs carrying the trigger label and boards
    /// each onto the train for its target branch.
    pub async fn check(&self) -> Result<(), StepError> {
        let filter = MergeRequestFilter::open_with_label(&self.train_label);
        let merge_requests = self.gitlab.merge_requests(&filter).await?;
        debug!(count = merge_requests.len(), "station check");

        for mr in merge_requests {
            let train = self.train_for(&mr.target_branch).await;
            train.add(mr).await?;
        }
        Ok(())
    }

    /// True if any train's active slot or queue holds this iid. Lets a
    /// webhook for a known MR skip the full discovery scan.
    pub async fn is_iid_on_board(&self, iid: MrIid) -> bool {
        let trains = self.trains.lock().await;
        for train in trains.values() {
            if train.is_on_board(iid).await {
                return true;
            }
        }
        false
    }

    /// Number of trains created so far (they are never removed).
    pub async fn train_count(&self) -> usize {
        self.trains.lock().await.len()
    }

    /// Returns the train for a destination branch, creating it lazily.
    async fn train_for(&self, destination: &str) -> Arc<MergeTrain> {
        let mut trains = self.trains.lock().await;
        trains
            .entry(destination.to_string())
            .or_insert_with(|| {
                debug!(%destination, "creating new train");
                Arc::new(MergeTrain::new(
                    destination,
                    self.gitlab.clone(),
                    self.delete_pipelines,
                ))
            })
            .clone()
    }
}

impl std::fmt::Debug for RailwayStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RailwayStation")
            .field("train_label", &self.train_label)
            .finish_non_exhaustive()
    }
}
