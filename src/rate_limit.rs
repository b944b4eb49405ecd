use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{config::RATE_LIMIT_WINDOW_SECONDS, error::ApiError};

const MAX_TRACKED_CLIENTS: usize = 10_000;

type RateLimitMap = HashMap<String, Vec<DateTime<Utc>>>;

/// Sliding-window request log keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: chrono::Duration,
    entries: Mutex<RateLimitMap>,
}

impl RateLimiter {
    pub fn per_minute(limit: usize) -> Self {
        Self {
            limit,
            window: chrono::Duration::seconds(RATE_LIMIT_WINDOW_SECONDS),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Records a hit for `key`, or returns the seconds until the oldest hit
    /// leaves the window.
    pub async fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Utc::now()).await
    }

    async fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<(), u64> {
        let window_start = now - self.window;
        let mut entries = self.entries.lock().await;

        if entries.len() >= MAX_TRACKED_CLIENTS {
            entries.retain(|_, hits| {
                hits.retain(|timestamp| *timestamp > window_start);
                !hits.is_empty()
            });
        }

        let hits = entries.entry(key.to_string()).or_default();
        hits.retain(|timestamp| *timestamp > window_start);

        if hits.len() >= self.limit {
            let reset_at = hits
                .first()
                .map(|oldest| *oldest + self.window)
                .unwrap_or(now + self.window);
            return Err((reset_at - now).num_seconds().max(1) as u64);
        }

        hits.push(now);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitLayerState {
    pub limiter: Arc<RateLimiter>,
    pub trust_proxy_headers: bool,
}

/// Rejects with 429 before the wrapped handler runs.
pub async fn enforce(
    State(state): State<RateLimitLayerState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_ip_for_request(state.trust_proxy_headers, request.headers(), peer);

    if let Err(retry_after_seconds) = state.limiter.check(&client_ip).await {
        warn!(
            %client_ip,
            path = request.uri().path(),
            limit = state.limiter.limit(),
            "rate limit exceeded"
        );
        return Err(ApiError::rate_limited(
            state.limiter.limit(),
            retry_after_seconds,
        ));
    }

    Ok(next.run(request).await)
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn client_ip_for_request(
    trust_proxy_headers: bool,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> String {
    let socket_ip = || {
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };

    if trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(socket_ip)
    } else {
        socket_ip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn sixth_hit_inside_window_is_rejected() {
        let limiter = RateLimiter::per_minute(5);
        let start = Utc::now();

        for offset in 0..5 {
            let now = start + chrono::Duration::seconds(offset);
            assert_eq!(limiter.check_at("10.0.0.1", now).await, Ok(()));
        }

        let retry_after = limiter
            .check_at("10.0.0.1", start + chrono::Duration::seconds(10))
            .await
            .expect_err("sixth hit must be limited");
        assert_eq!(retry_after, 50);
        assert_eq!(limiter.check_at("10.0.0.2", start).await, Ok(()));
    }

    #[tokio::test]
    async fn hits_expire_after_the_window() {
        let limiter = RateLimiter::per_minute(1);
        let start = Utc::now();

        assert_eq!(limiter.check_at("a", start).await, Ok(()));
        assert!(limiter.check_at("a", start + chrono::Duration::seconds(59)).await.is_err());
        assert_eq!(
            limiter.check_at("a", start + chrono::Duration::seconds(61)).await,
            Ok(())
        );
    }

    #[test]
    fn proxy_headers_only_used_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:4000".parse().expect("addr");

        assert_eq!(client_ip_for_request(true, &headers, Some(peer)), "203.0.113.7");
        assert_eq!(client_ip_for_request(false, &headers, Some(peer)), "127.0.0.1");
        assert_eq!(client_ip_for_request(false, &headers, None), "unknown");
        assert_eq!(
            client_ip_for_request(true, &HeaderMap::new(), Some(peer)),
            "127.0.0.1"
        );
    }
}
