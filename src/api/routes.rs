use axum::{
    http::{header, Method},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::analytics::AnalyticsAggregator;
use crate::auth::{auth_middleware, AuthService};

use super::analytics::{get_link_analytics, get_link_breakdown, health_check, ApiState};

pub fn create_api_router(
    aggregator: Arc<AnalyticsAggregator>,
    auth_service: Arc<AuthService>,
) -> Router {
    let state = Arc::new(ApiState { aggregator });

    let protected_routes = Router::new()
        .route("/api/links/{id}/analytics", get(get_link_analytics))
        .route(
            "/api/links/{id}/analytics/breakdown/{column}",
            get(get_link_breakdown),
        )
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::AUTHORIZATION]);

    Router::new()
        .route("/api/health", get(health_check))
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
