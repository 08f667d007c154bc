//! Analytics API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::{AnalyticsAggregator, AnalyticsError, DEFAULT_DAYS, DEFAULT_TOP_N};
use crate::auth::Caller;

pub struct ApiState {
    pub aggregator: Arc<AnalyticsAggregator>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQueryParams {
    /// Trailing window in days; 0 or less means all-time
    #[serde(default = "default_days")]
    pub days: i64,

    /// Size of each top-N breakdown
    #[serde(default = "default_top_n", alias = "topN")]
    pub top_n: i64,
}

fn default_days() -> i64 {
    DEFAULT_DAYS
}

fn default_top_n() -> i64 {
    DEFAULT_TOP_N
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AnalyticsError {
    fn into_response(self) -> Response {
        let status = match &self {
            // A link the caller does not own looks the same as a missing one
            AnalyticsError::LinkNotFound | AnalyticsError::NotAuthorized => StatusCode::NOT_FOUND,
            AnalyticsError::InvalidColumn(_) => StatusCode::BAD_REQUEST,
            AnalyticsError::Storage(err) => {
                tracing::error!("Failed to aggregate analytics: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error = match self {
            AnalyticsError::NotAuthorized => AnalyticsError::LinkNotFound.to_string(),
            AnalyticsError::Storage(_) => "Failed to retrieve analytics".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Full analytics summary for a link
pub async fn get_link_analytics(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Path(link_id): Path<i64>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Response {
    match state
        .aggregator
        .aggregate(link_id, &caller.id, params.days, params.top_n)
        .await
    {
        Ok(analytics) => Json(analytics).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Top-N breakdown for one dimension
pub async fn get_link_breakdown(
    State(state): State<Arc<ApiState>>,
    Extension(caller): Extension<Caller>,
    Path((link_id, column)): Path<(i64, String)>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Response {
    match state
        .aggregator
        .breakdown(link_id, &caller.id, &column, params.days, params.top_n)
        .await
    {
        Ok(groups) => Json(groups).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "OK" }))
}
