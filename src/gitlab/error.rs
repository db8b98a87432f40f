//! GitLab API error types.
//!
//! Two layers, mirroring the retry design:
//!
//! - [`RequestError`] describes one failed attempt (bad status, transport
//!   failure, unparseable body). Individual attempts are never surfaced to
//!   callers directly.
//! - [`ApiError`] is what a logical call returns after the retry wrapper has
//!   given up: the retry-exhausted error, carrying the last attempt's
//!   failure as its source.
//!
//! The retry policy is deliberately uniform across failure kinds — it does
//! not distinguish retryable (5xx, network) from non-retryable (4xx)
//! failures. A malformed request will retry up to the bound before failing.
//! This is a known inefficiency carried over intentionally; do not "fix" it
//! by categorizing status codes here.

use thiserror::Error;

/// HTTP status for "method not allowed" — GitLab's answer when a rebase or
/// merge cannot proceed (merge conflicts, failed pipeline).
pub const METHOD_NOT_ALLOWED: u16 = 405;

/// A single failed request attempt.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The server answered outside the 2xx/3xx range.
    #[error("response status {status}: {body}")]
    Status {
        status: u16,
        /// Response body, kept verbatim for diagnostics and user comments.
        body: String,
    },

    /// The request never produced a response (connect, DNS, timeout, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the JSON we expected.
    #[error("error parsing response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl RequestError {
    /// The HTTP status code of this attempt, if one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            RequestError::Transport(e) => e.status().map(|s| s.as_u16()),
            RequestError::Json(_) => None,
        }
    }
}

/// The failure of a whole logical API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The retry bound was exceeded. `attempts` counts every attempt made,
    /// including the first.
    #[error("too many retries ({attempts} attempts): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: RequestError,
    },
}

impl ApiError {
    /// The HTTP status code of the last failed attempt, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::RetryExhausted { source, .. } => source.status_code(),
        }
    }

    /// True if the call ultimately failed with HTTP 405.
    ///
    /// Used by the train loop to recognize "merge conflicts or failed
    /// pipeline" answers to rebase and merge requests.
    pub fn is_method_not_allowed(&self) -> bool {
        self.status_code() == Some(METHOD_NOT_ALLOWED)
    }
}
