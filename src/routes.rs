//! Route definitions and endpoint mappings.
//!
//! This file should remain minimal, containing only endpoint path definitions and their handler mappings.

use axum::routing::post;
use axum::Router;

use crate::endpoints;
use crate::gateway_util::AppStateData;

pub fn build_router() -> Router<AppStateData> {
    Router::new()
        .route("/invocation", post(endpoints::invocation::invocation_handler))
        .route("/conversion", post(endpoints::conversion::conversion_handler))
        .route("/stats", post(endpoints::stats::stats_handler))
        .route("/registration", post(endpoints::registration::registration_handler))
        .route("/status", axum::routing::get(endpoints::status::status_handler))
        .route("/health", axum::routing::get(endpoints::status::health_handler))
}
