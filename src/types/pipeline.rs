//! The pipeline model.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PipelineId;

/// Pipeline execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Success,
    Failed,
    Pending,
    Canceled,
    Skipped,
    Created,
    #[serde(other)]
    Unknown,
}

impl PipelineStatus {
    /// True while the pipeline still occupies a runner slot or is waiting
    /// for one — the two states a train must wait out.
    pub fn is_active(self) -> bool {
        matches!(self, PipelineStatus::Running | PipelineStatus::Pending)
    }

    /// True for statuses the pre-merge cleanup cancels or deletes.
    ///
    /// Canceled and failed pipelines are included so that `delete` mode can
    /// clear them out as well.
    pub fn is_cancelable(self) -> bool {
        matches!(
            self,
            PipelineStatus::Running
                | PipelineStatus::Pending
                | PipelineStatus::Created
                | PipelineStatus::Canceled
                | PipelineStatus::Failed
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
            PipelineStatus::Created => "created",
            PipelineStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A CI pipeline attached to a merge request.
///
/// Association with an MR is by membership in the MR's pipeline list only;
/// no back-reference is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,

    #[serde(default)]
    pub sha: String,

    #[serde(rename = "ref", default)]
    pub git_ref: String,

    pub status: PipelineStatus,

    #[serde(default)]
    pub web_url: String,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.status, self.web_url)
    }
}

/// True if any pipeline in the slice is still running or pending.
pub fn any_active(pipelines: &[Pipeline]) -> bool {
    pipelines.iter().any(|p| p.status.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(status: PipelineStatus) -> Pipeline {
        Pipeline {
            id: PipelineId(1),
            sha: "abc".into(),
            git_ref: "feature".into(),
            status,
            web_url: "http://x/p/1".into(),
        }
    }

    #[test]
    fn deserializes_ref_field() {
        let json = r#"{
            "id": 10,
            "sha": "deadbeef",
            "ref": "refs/merge-requests/42/head",
            "status": "running",
            "web_url": "http://x/p/10"
        }"#;

        let p: Pipeline = serde_json::from_str(json).unwrap();
        assert_eq!(p.id, PipelineId(10));
        assert_eq!(p.git_ref, "refs/merge-requests/42/head");
        assert_eq!(p.status, PipelineStatus::Running);
    }

    #[test]
    fn active_statuses() {
        assert!(PipelineStatus::Running.is_active());
        assert!(PipelineStatus::Pending.is_active());
        assert!(!PipelineStatus::Success.is_active());
        assert!(!PipelineStatus::Failed.is_active());
        assert!(!PipelineStatus::Created.is_active());
    }

    #[test]
    fn cancelable_statuses() {
        for status in [
            PipelineStatus::Running,
            PipelineStatus::Pending,
            PipelineStatus::Created,
            PipelineStatus::Canceled,
            PipelineStatus::Failed,
        ] {
            assert!(status.is_cancelable(), "{status} should be cancelable");
        }
        assert!(!PipelineStatus::Success.is_cancelable());
        assert!(!PipelineStatus::Skipped.is_cancelable());
    }

    #[test]
    fn any_active_over_slice() {
        assert!(!any_active(&[]));
        assert!(!any_active(&[pipeline(PipelineStatus::Success)]));
        assert!(any_active(&[
            pipeline(PipelineStatus::Success),
            pipeline(PipelineStatus::Pending),
        ]));
    }

    #[test]
    fn unknown_status_does_not_fail() {
        let json = r#"{"id": 1, "status": "preparing"}"#;
        let p: Pipeline = serde_json::from_str(json).unwrap();
        assert_eq!(p.status, PipelineStatus::Unknown);
        assert!(!p.status.is_active());
    }
}
