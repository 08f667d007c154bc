use axum::{routing::get, Router};
use std::sync::Arc;

use crate::cloak::CloakingProxy;
use crate::config::ClientIpConfig;
use crate::resolver::LinkResolver;

use super::handlers::{health_check, missing_slug, redirect_slug, unmatched_path, RedirectState};

pub fn create_redirect_router(
    resolver: Arc<LinkResolver>,
    cloak: Arc<CloakingProxy>,
    client_ip: ClientIpConfig,
) -> Router {
    let state = Arc::new(RedirectState {
        resolver,
        cloak,
        client_ip,
    });

    Router::new()
        .route("/healthz", get(health_check))
        .route("/", get(missing_slug))
        .route("/{slug}", get(redirect_slug))
        .fallback(unmatched_path)
        .with_state(state)
}
