//! Webhook endpoint handler.
//!
//! Accepts GitLab merge request events. An event whose labels include the
//! trigger label puts the station to work: if the MR is not already on a
//! train, a full discovery scan runs before the response is sent. Events
//! without the trigger label are acknowledged with 201 and ignored.
//!
//! The scan is awaited rather than spooled, so the response takes as long
//! as boarding takes; GitLab's webhook timeout is generous enough for the
//! common case, and retried deliveries are idempotent thanks to
//! `is_iid_on_board` and idempotent train admission.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::train::StepError;
use crate::types::MergeRequestHook;

/// Header carrying the webhook secret configured on the GitLab side.
const HEADER_GITLAB_TOKEN: &str = "x-gitlab-token";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The configured secret did not match the delivery's token header.
    #[error("invalid webhook token")]
    InvalidToken,

    /// The station failed while boarding.
    #[error("station check failed: {0}")]
    Check(#[from] StepError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidToken => StatusCode::UNAUTHORIZED,
            WebhookError::Check(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Header `X-Gitlab-Token`: required iff a webhook secret is configured
/// - Body: JSON merge request event
///
/// # Response
///
/// - 200 OK: trigger label present; MR already on board, or scan completed
/// - 201 Created: no trigger label, event ignored
/// - 401 Unauthorized: token mismatch
/// - 500 Internal Server Error: the boarding scan failed
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(hook): Json<MergeRequestHook>,
) -> Result<(StatusCode, &'static str), WebhookError> {
    verify_token(&headers, app_state.webhook_secret())?;

    let station = app_state.station();
    let iid = hook.object_attributes.iid;

    debug!(
        %iid,
        title = %hook.object_attributes.title,
        url = hook.object_attributes.url.as_deref().unwrap_or(""),
        "received merge request event"
    );

    if !hook.has_label(station.train_label()) {
        debug!(%iid, label = station.train_label(), "ignoring, trigger label not present");
        return Ok((StatusCode::CREATED, "Ignored"));
    }

    if station.is_iid_on_board(iid).await {
        debug!(%iid, "already on board, skipping discovery scan");
        return Ok((StatusCode::OK, "Already on board"));
    }

    match station.check().await {
        Ok(()) => Ok((StatusCode::OK, "OK")),
        Err(err) => {
            warn!(%iid, error = %err, "station check failed");
            Err(WebhookError::Check(err))
        }
    }
}

/// Compares the delivery's token header against the configured secret.
/// With no secret configured, every delivery is accepted.
fn verify_token(headers: &HeaderMap, secret: Option<&str>) -> Result<(), WebhookError> {
    let Some(secret) = secret else {
        return Ok(());
    };

    let provided = headers
        .get(HEADER_GITLAB_TOKEN)
        .and_then(|value| value.to_str().ok());

    if provided == Some(secret) {
        Ok(())
    } else {
        Err(WebhookError::InvalidToken)
    }
}
