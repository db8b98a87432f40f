//! Environment-based configuration.
//!
//! All runtime configuration comes from the environment:
//!
//! - `GITLAB_TOKEN` — API token (required)
//! - `GITLAB_HOST` — host of the GitLab instance (required)
//! - `GITLAB_PROJECT_ID` — numeric ID or URL-encoded path of the project
//!   (required)
//! - `HTTPS` — set to `false` to talk to GitLab over plain HTTP
//! - `MERGE_TRAIN_PORT` — webhook server port (default 56874)
//! - `DELETE_PIPELINES` — set to `true` to delete cancelable pipelines
//!   instead of cancelling them
//! - `MERGE_TRAIN_LABEL` — trigger label (default `merge_train`)
//! - `MERGE_TRAIN_WEBHOOK_SECRET` — shared secret checked against
//!   `X-Gitlab-Token` (optional; unchecked when unset)

use thiserror::Error;

use crate::types::ProjectId;

/// Default webhook server port.
const DEFAULT_PORT: u16 = 56874;

/// Default trigger label.
const DEFAULT_TRAIN_LABEL: &str = "merge_train";

/// Errors raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GITLAB_TOKEN is not set")]
    MissingToken,

    #[error("GITLAB_HOST is not set")]
    MissingHost,

    #[error("GITLAB_PROJECT_ID is not set")]
    MissingProject,

    #[error("invalid MERGE_TRAIN_PORT: {0}")]
    InvalidPort(String),
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scheme + host of the GitLab instance, e.g. `https://gitlab.example.com`.
    pub gitlab_base_url: String,

    /// API token sent as `Private-Token`.
    pub gitlab_token: String,

    /// The project whose MRs ride the trains.
    pub project_id: ProjectId,

    /// Port the webhook server listens on.
    pub port: u16,

    /// Delete cancelable pipelines instead of cancelling them.
    pub delete_pipelines: bool,

    /// The label that puts an MR on a train.
    pub train_label: String,

    /// Shared secret for inbound webhooks.
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary lookup, which is what
    /// the tests use instead of mutating the process environment.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = get("GITLAB_TOKEN").ok_or(ConfigError::MissingToken)?;
        let host = get("GITLAB_HOST").ok_or(ConfigError::MissingHost)?;
        let project = get("GITLAB_PROJECT_ID").ok_or(ConfigError::MissingProject)?;

        let scheme = match get("HTTPS").as_deref() {
            Some("false") => "http",
            _ => "https",
        };

        let port = match get("MERGE_TRAIN_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Config {
            gitlab_base_url: format!("{}://{}", scheme, host),
            gitlab_token: token,
            project_id: ProjectId::new(project),
            port,
            delete_pipelines: get("DELETE_PIPELINES").as_deref() == Some("true"),
            train_label: get("MERGE_TRAIN_LABEL")
                .unwrap_or_else(|| DEFAULT_TRAIN_LABEL.to_string()),
            webhook_secret: get("MERGE_TRAIN_WEBHOOK_SECRET"),
        })
    }
}
