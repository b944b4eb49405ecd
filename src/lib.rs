pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod janitor;
pub mod quality;
pub mod rate_limit;
pub mod store;
pub mod validate;

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    api::{AppState, build_router},
    config::AppConfig,
    error::ApiError,
    fetch::{MediaFetcher, YtDlpFetcher},
    janitor::Janitor,
    store::ArtifactStore,
};

pub async fn run(config: AppConfig) -> Result<(), ApiError> {
    let store = Arc::new(ArtifactStore::open(&config.downloads_dir).await?);
    warn_missing_collaborators(&config);

    let fetcher: Arc<dyn MediaFetcher> = Arc::new(YtDlpFetcher::new(&config));
    let _janitor = Janitor::new(
        Arc::clone(&store),
        config.cleanup_interval,
        config.file_expiration,
    )
    .spawn();

    let app = build_router(&config, AppState { store, fetcher })?;

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
        })?;

    info!("server ready on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

fn warn_missing_collaborators(config: &AppConfig) {
    if !config.cookie_file.is_file() {
        warn!(path = %config.cookie_file.display(), "cookie file not found");
    }
    if !config.converter_path.is_file() {
        warn!(path = %config.converter_path.display(), "converter binary not found");
    }
    if !config.frontend_index().is_file() {
        warn!(path = %config.frontend_index().display(), "frontend index document not found");
    }
}
