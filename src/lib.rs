//! Railyard - a GitLab bot that sequences merge requests onto per-branch
//! merge trains.
//!
//! Only one merge request at a time is rebased, pipelined and merged into a
//! given destination branch; everything else waits in that branch's queue.
//! This library provides the scheduling engine (station, trains, passengers,
//! the condition poller and the retried GitLab client); the binary wires it
//! to an axum webhook server.

pub mod config;
pub mod gitlab;
pub mod poll;
pub mod server;
pub mod station;
pub mod train;
pub mod types;

#[cfg(test)]
mod test_utils;
