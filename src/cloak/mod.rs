//! Cloaking proxy
//!
//! Serves a destination's body under the short URL instead of redirecting.
//! Frame-blocking headers are removed so the page can render in place; sites
//! with other framing defenses may still break. Any upstream failure turns
//! into a plain redirect.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CloakConfig;

/// Headers that never cross the proxy.
const STRIPPED_HEADERS: [HeaderName; 6] = [
    header::CONTENT_SECURITY_POLICY,
    header::X_FRAME_OPTIONS,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TRAILER,
];

pub enum CloakOutcome {
    Proxied(Response),
    RedirectFallback(String),
}

pub struct CloakingProxy {
    client: reqwest::Client,
}

impl CloakingProxy {
    pub fn new(config: &CloakConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("switchyard-cloak/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client for cloaking")?;
        Ok(Self { client })
    }

    pub async fn serve_cloaked(&self, target_url: &str) -> CloakOutcome {
        let upstream = match self.client.get(target_url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(target = %target_url, error = %err, "cloak fetch failed, redirecting instead");
                return CloakOutcome::RedirectFallback(target_url.to_string());
            }
        };

        let status = upstream.status();
        if !status.is_success() {
            debug!(target = %target_url, status = %status, "cloak target returned non-success, redirecting instead");
            return CloakOutcome::RedirectFallback(target_url.to_string());
        }

        let headers = relay_headers(upstream.headers());

        let mut response = Body::from_stream(upstream.bytes_stream()).into_response();
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        CloakOutcome::Proxied(response)
    }
}

/// Upstream headers minus frame blockers and hop-by-hop fields.
pub fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in STRIPPED_HEADERS.iter() {
        headers.remove(name);
    }
    headers.remove("content-security-policy-report-only");
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
    headers
}
