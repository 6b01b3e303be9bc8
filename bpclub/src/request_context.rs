//! Client details for audit entries and rate limiting.
//!
//! The caller's address is the connection peer. `X-Forwarded-For` and `X-Real-IP` are only
//! believed when `trust_proxy_headers` is set, since any client can send them.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::{convert::Infallible, net::SocketAddr};

use crate::AppState;

/// Caller address and user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        // First hop of X-Forwarded-For is the original client
        let forwarded = trust_proxy_headers
            .then(|| {
                header("x-forwarded-for")
                    .and_then(|v| v.split(',').next())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .or_else(|| header("x-real-ip"))
            })
            .flatten();

        let ip_address = forwarded
            .map(str::to_string)
            .or_else(|| peer.map(|addr| addr.ip().to_string()));

        Self {
            ip_address,
            user_agent: header("user-agent").map(str::to_string),
        }
    }

    /// Key used to bucket requests per client.
    pub fn rate_limit_key(&self) -> String {
        self.ip_address.clone().unwrap_or_else(|| "unknown".to_string())
    }
}

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr);
        Ok(Self::resolve(&parts.headers, peer, state.config.trust_proxy_headers))
    }
}
