//! Router assembly.

pub mod health;
pub mod trees;

use crate::config::ApiConfig;
use crate::extractors::USER_ID_HEADER;
use crate::state::AppState;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Layers, outermost first: CORS, then request tracing.
pub fn create_api_router(state: AppState, config: &ApiConfig) -> Router {
    Router::new()
        .nest("/api/v1/trees", trees::create_router())
        .route("/health", get(health::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(config))
}

/// In development mode (no origins configured) every origin is allowed.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: allowing configured origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins).allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ])
    }
}
