//! HTTP server for the merge train bot.
//!
//! This module implements the HTTP server that:
//! - Accepts merge request webhooks from GitLab and dispatches them to the
//!   station
//! - Provides a health check for liveness probes
//!
//! # Endpoints
//!
//! - `POST /mergerequest` - Accepts GitLab merge request events
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::webhook_handler;

use crate::station::RailwayStation;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor. The station
/// is an explicitly constructed object — nothing here is a process global.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// The station handling discovery and dispatch.
    station: Arc<RailwayStation>,

    /// Optional shared secret, compared against `X-Gitlab-Token`.
    webhook_secret: Option<String>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// With `webhook_secret` set, deliveries must carry the matching
    /// `X-Gitlab-Token` header; without it, no authentication is performed.
    pub fn new(station: Arc<RailwayStation>, webhook_secret: Option<String>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                station,
                webhook_secret,
            }),
        }
    }

    /// Returns the station.
    pub fn station(&self) -> &Arc<RailwayStation> {
        &self.inner.station
    }

    /// Returns the webhook secret, if configured.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.inner.webhook_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/mergerequest", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeGitlab;

    #[test]
    fn app_state_accessors_work() {
        let gitlab = Arc::new(FakeGitlab::new());
        let station = Arc::new(RailwayStation::new(gitlab, "merge_train", false));

        let state = AppState::new(station.clone(), Some("hunter2".to_string()));

        assert_eq!(state.station().train_label(), "merge_train");
        assert_eq!(state.webhook_secret(), Some("hunter2"));
    }

    #[test]
    fn app_state_is_clone() {
        let gitlab = Arc::new(FakeGitlab::new());
        let station = Arc::new(RailwayStation::new(gitlab, "merge_train", false));

        let state = AppState::new(station, None);
        let cloned = state.clone();
        assert!(cloned.webhook_secret().is_none());
    }
}
