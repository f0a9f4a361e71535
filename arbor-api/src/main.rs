//! ARBOR API Server Entry Point
//!
//! Loads configuration, seeds the in-memory store and starts the Axum
//! HTTP server.

use arbor_api::telemetry::init_tracing;
use arbor_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use arbor_core::PlannerConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ApiConfig::from_env()?;
    init_tracing(config.log_format)?;

    let state = AppState::from_config(&config, PlannerConfig::from_env())?;
    let app = create_api_router(state, &config);

    let addr = config.bind_addr()?;
    tracing::info!(%addr, model = %config.openai_model, "Starting ARBOR API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
