use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use railyard::config::Config;
use railyard::gitlab::{GitlabClient, RetryConfig};
use railyard::server::{AppState, build_router};
use railyard::station::RailwayStation;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "railyard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let gitlab = match GitlabClient::new(
        &config.gitlab_base_url,
        &config.gitlab_token,
        config.project_id.clone(),
        RetryConfig::DEFAULT,
    ) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("failed to build GitLab client: {err}");
            std::process::exit(1);
        }
    };

    let station = Arc::new(RailwayStation::new(
        Arc::new(gitlab),
        config.train_label.clone(),
        config.delete_pipelines,
    ));

    let app = build_router(AppState::new(station, config.webhook_secret.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("merge train server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
