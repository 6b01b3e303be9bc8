//! Fixed-window, per-client request limiting.
//!
//! Counters live in a `moka` cache whose entries expire one window after they are created, so a
//! client's budget resets a window after its first request. State is per process.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header::HeaderName},
    middleware::Next,
    response::{IntoResponse, Response},
};
use moka::future::Cache;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use tracing::debug;

use crate::{AppState, config::RateLimitConfig, errors::Error, request_context::ClientInfo};

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    counters: Cache<String, Arc<AtomicU32>>,
    limit: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            counters: Cache::builder()
                .max_capacity(config.max_tracked_clients)
                .time_to_live(config.window)
                .build(),
            limit: config.max_requests,
        }
    }

    /// Count a request for `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let counter = self
            .counters
            .get_with(key.to_string(), async { Arc::new(AtomicU32::new(0)) })
            .await;
        let used = counter.fetch_add(1, Ordering::SeqCst).saturating_add(1);

        RateLimitDecision {
            allowed: used <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
        }
    }
}

/// Middleware applying the shared limiter to the routes it wraps.
pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    let (mut parts, body) = request.into_parts();
    let Ok(client) = ClientInfo::from_request_parts(&mut parts, &state).await;
    let request = Request::from_parts(parts, body);
    let decision = limiter.check(&client.rate_limit_key()).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(client = %client.rate_limit_key(), "Rate limit exceeded");
        Error::TooManyRequests.into_response()
    };

    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from(decision.limit));
    headers.insert(HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from(decision.remaining));
    response
}
