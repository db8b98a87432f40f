//! Core domain types for the merge train bot.
//!
//! This module contains the fundamental types used throughout the
//! application, designed to encode invariants via the type system.

pub mod ids;
pub mod merge_request;
pub mod pipeline;
pub mod webhook;

// Re-export commonly used types at the module level
pub use ids::{MrIid, NoteId, PipelineId, ProjectId, TrainId};
pub use merge_request::{MergeRequest, MergeStatus, MrState};
pub use pipeline::{Pipeline, PipelineStatus, any_active};
pub use webhook::{HookAttributes, HookLabel, MergeRequestHook};
