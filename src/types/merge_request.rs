//! The merge request model, as read from and written to the GitLab API.
//!
//! Only the fields the scheduling core reads or writes are modeled; the API
//! returns many more, which serde ignores. The remote system is the source
//! of truth — this struct is always a snapshot, never assumed fresh.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::MrIid;

/// The lifecycle state of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MrState {
    Opened,
    Closed,
    Locked,
    Merged,
    /// Any state this version doesn't know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MrState::Opened => "opened",
            MrState::Closed => "closed",
            MrState::Locked => "locked",
            MrState::Merged => "merged",
            MrState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// GitLab's computed mergeability of a merge request.
///
/// `Unchecked` and `Checking` mean GitLab hasn't finished computing; the
/// mergeability poll treats anything but `CanBeMerged` as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    CanBeMerged,
    CannotBeMerged,
    Unchecked,
    Checking,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeStatus::CanBeMerged => "can_be_merged",
            MergeStatus::CannotBeMerged => "cannot_be_merged",
            MergeStatus::Unchecked => "unchecked",
            MergeStatus::Checking => "checking",
            MergeStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A merge request snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: MrIid,

    pub title: String,

    /// The branch this MR merges into — the key that assigns it to a train.
    pub target_branch: String,

    /// Labels as an unordered set; mutated read-modify-write by the core.
    #[serde(default)]
    pub labels: Vec<String>,

    pub state: MrState,

    pub merge_status: MergeStatus,

    /// Only present when fetched with `include_rebase_in_progress=true`.
    #[serde(default)]
    pub rebase_in_progress: bool,

    /// Set by GitLab when a rebase or merge fails server-side.
    #[serde(default)]
    pub merge_error: Option<String>,

    pub web_url: String,
}

impl MergeRequest {
    /// True if the MR carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl fmt::Display for MergeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.title, self.state, self.web_url)
    }
}
