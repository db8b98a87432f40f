//! Inbound GitLab merge request webhook payload.
//!
//! Only the fields the dispatch decision needs: the trigger label and the
//! MR's identity. Everything else in the (large) payload is ignored.

use serde::Deserialize;

use super::ids::MrIid;

/// A label as it appears in webhook payloads (an object, unlike the plain
/// strings the REST API returns on merge requests).
#[derive(Debug, Clone, Deserialize)]
pub struct HookLabel {
    pub title: String,
}

/// The `object_attributes` of a merge request event.
#[derive(Debug, Clone, Deserialize)]
pub struct HookAttributes {
    pub iid: MrIid,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub url: Option<String>,
}

/// A merge request webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestHook {
    #[serde(default)]
    pub labels: Vec<HookLabel>,

    pub object_attributes: HookAttributes,
}

impl MergeRequestHook {
    /// True if the event's labels include the given trigger label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.title == label)
    }
}
