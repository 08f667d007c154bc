use axum::{
    extract::{rejection::PathRejection, ConnectInfo, Path, State},
    http::{header, header::HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use crate::classifier::ip::extract_client_ip;
use crate::cloak::{CloakOutcome, CloakingProxy};
use crate::config::ClientIpConfig;
use crate::recorder::Visit;
use crate::resolver::{HitOutcome, LinkResolver};

/// Header set by the upstream router with the host the visitor asked for.
pub const ORIGINAL_HOST_HEADER: &str = "x-original-host";

pub struct RedirectState {
    pub resolver: Arc<LinkResolver>,
    pub cloak: Arc<CloakingProxy>,
    pub client_ip: ClientIpConfig,
}

/// Why a visitor ended up on the landing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingReason {
    MissingSlug,
    MissingHost,
    NotFound,
    Unavailable,
}

impl LandingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LandingReason::MissingSlug => "missing_slug",
            LandingReason::MissingHost => "missing_host",
            LandingReason::NotFound => "not_found",
            LandingReason::Unavailable => "unavailable",
        }
    }
}

pub fn landing_location(landing_url: &str, reason: LandingReason) -> String {
    let separator = if landing_url.contains('?') { '&' } else { '?' };
    format!("{}{}error={}", landing_url, separator, reason.as_str())
}

fn to_landing(state: &RedirectState, reason: LandingReason) -> Response {
    Redirect::temporary(&landing_location(state.resolver.landing_url(), reason)).into_response()
}

fn permanent_redirect(target_url: &str) -> Response {
    // 301, not the 308 that Redirect::permanent emits
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, target_url.to_string())],
    )
        .into_response()
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `GET /` with no slug
pub async fn missing_slug(State(state): State<Arc<RedirectState>>) -> Response {
    to_landing(&state, LandingReason::MissingSlug)
}

/// Any path that is not a single slug segment
pub async fn unmatched_path(State(state): State<Arc<RedirectState>>) -> Response {
    to_landing(&state, LandingReason::NotFound)
}

/// Resolve a slug and send the visitor on
pub async fn redirect_slug(
    State(state): State<Arc<RedirectState>>,
    slug: Result<Path<String>, PathRejection>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
) -> Response {
    let request_start = Instant::now();

    // Undecodable slugs (e.g. invalid UTF-8) cannot name a link
    let Ok(Path(slug)) = slug else {
        return to_landing(&state, LandingReason::NotFound);
    };
    let slug = slug.trim();
    if slug.is_empty() {
        return to_landing(&state, LandingReason::MissingSlug);
    }

    let Some(host) = header_string(&headers, ORIGINAL_HOST_HEADER) else {
        tracing::debug!(slug = %slug, "request without original host header");
        return to_landing(&state, LandingReason::MissingHost);
    };

    let socket_ip = connect_info
        .map(|Extension(ConnectInfo(addr))| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let visit = Visit {
        timestamp: chrono::Utc::now().timestamp(),
        ip: extract_client_ip(&headers, socket_ip, &state.client_ip),
        user_agent: header_string(&headers, header::USER_AGENT),
        referrer: header_string(&headers, header::REFERER),
        accept_language: header_string(&headers, header::ACCEPT_LANGUAGE),
    };

    let outcome = match state.resolver.handle_hit(slug, &host, visit).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(slug = %slug, host = %host, error = %err, "link lookup failed");
            return to_landing(&state, LandingReason::Unavailable);
        }
    };

    let response = match outcome {
        HitOutcome::NotFound => {
            tracing::debug!(slug = %slug, host = %host, "no link for slug");
            to_landing(&state, LandingReason::NotFound)
        }
        HitOutcome::Redirect { target_url, .. } => permanent_redirect(&target_url),
        HitOutcome::Cloak { target_url, .. } => match state.cloak.serve_cloaked(&target_url).await {
            CloakOutcome::Proxied(response) => response,
            CloakOutcome::RedirectFallback(url) => permanent_redirect(&url),
        },
    };

    tracing::debug!(
        slug = %slug,
        status = %response.status(),
        elapsed_ms = request_start.elapsed().as_millis() as u64,
        "served hit"
    );
    response
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
