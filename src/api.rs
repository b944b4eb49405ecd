use std::{collections::HashSet, path::Path as FsPath, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ApiError,
    fetch::{self, MediaFetcher},
    quality::Quality,
    rate_limit::{self, RateLimitLayerState, RateLimiter},
    store::ArtifactStore,
    validate::is_supported_video_url,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ArtifactStore>,
    pub fetcher: Arc<dyn MediaFetcher>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: Option<String>,
    pub quality: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub download_id: Uuid,
    pub filename: String,
}

/// Routes: `POST /download` behind the download quota; everything else,
/// including the static frontend fallback, behind the default quota.
pub fn build_router(config: &AppConfig, state: AppState) -> Result<Router, ApiError> {
    let download_quota = RateLimitLayerState {
        limiter: Arc::new(RateLimiter::per_minute(config.download_limit_per_minute)),
        trust_proxy_headers: config.trust_proxy_headers,
    };
    let default_quota = RateLimitLayerState {
        limiter: Arc::new(RateLimiter::per_minute(config.default_limit_per_minute)),
        trust_proxy_headers: config.trust_proxy_headers,
    };

    let frontend = ServeDir::new(&config.frontend_dir)
        .fallback(ServeFile::new(config.frontend_index()));

    let download_routes = Router::new()
        .route("/download", post(start_download))
        .route_layer(middleware::from_fn_with_state(
            download_quota,
            rate_limit::enforce,
        ));

    let default_routes = Router::new()
        .route("/download/{id}", get(fetch_artifact))
        .route("/api/health", get(health))
        .fallback_service(frontend)
        .layer(middleware::from_fn_with_state(
            default_quota,
            rate_limit::enforce,
        ));

    Ok(download_routes
        .merge(default_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.allowed_origins)?))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let url = payload.url.as_deref().unwrap_or_default();
    if !is_supported_video_url(url) {
        return Err(ApiError::bad_request("Invalid or missing URL."));
    }

    let quality = requested_quality(payload.quality.as_ref());
    let artifact = fetch::dispatch(&state.store, state.fetcher.as_ref(), url, quality).await?;

    Ok(Json(DownloadResponse {
        download_id: artifact.id,
        filename: artifact.filename,
    }))
}

async fn fetch_artifact(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::not_found("File not found.");
    let id = Uuid::parse_str(&raw_id).map_err(|_| not_found())?;
    let opened = state.store.open_artifact(id).await?.ok_or_else(not_found)?;
    let created_at = opened.artifact.created_at;
    let filename = opened.artifact.filename;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(opened.len));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    debug!(%id, %filename, %created_at, bytes = opened.len, "serving artifact");
    let body = Body::from_stream(ReaderStream::new(opened.file));
    Ok((headers, body).into_response())
}

fn requested_quality(value: Option<&serde_json::Value>) -> Quality {
    match value {
        None | Some(serde_json::Value::Null) => Quality::Best,
        Some(serde_json::Value::String(raw)) => Quality::from_request(Some(raw)),
        Some(other) => {
            warn!(quality = %other, "unrecognized quality, using best");
            Quality::Best
        }
    }
}

fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    if configured.is_empty() {
        debug!("ALLOWED_ORIGINS not set, accepting any origin");
        return Ok(layer.allow_origin(Any));
    }

    let normalized_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Expected values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        normalized_origins.len(),
        normalized_origins
    );

    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .ok()
            .and_then(normalize_origin)
            .is_some_and(|value| allowed_origins.contains(&value))
    });

    Ok(layer.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.mp4".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("HTTPS://Example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_allow_list_is_rejected() {
        assert!(build_cors_layer(&["not-an-origin".to_string()]).is_err());
        assert!(build_cors_layer(&["https://example.com".to_string()]).is_ok());
        assert!(build_cors_layer(&[]).is_ok());
    }

    #[test]
    fn content_disposition_is_ascii_safe() {
        assert_eq!(
            build_content_disposition("clip ü.mp4"),
            "attachment; filename=\"clip _.mp4\"; filename*=UTF-8''clip%20%C3%BC.mp4"
        );
        assert_eq!(sanitize_ascii_filename("   "), "download.mp4");
    }

    #[test]
    fn non_string_quality_falls_back_to_best() {
        use serde_json::json;

        assert_eq!(requested_quality(None), Quality::Best);
        assert_eq!(requested_quality(Some(&json!(null))), Quality::Best);
        assert_eq!(requested_quality(Some(&json!(720))), Quality::Best);
        assert_eq!(requested_quality(Some(&json!(["720p"]))), Quality::Best);
        assert_eq!(requested_quality(Some(&json!("720p"))), Quality::P720);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for_filename("a.MP4"), "video/mp4");
        assert_eq!(content_type_for_filename("a.webm"), "video/webm");
        assert_eq!(content_type_for_filename("a"), "application/octet-stream");
    }
}
