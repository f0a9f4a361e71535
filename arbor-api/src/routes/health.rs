//! Health check endpoint. No user identity required.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub model_configured: bool,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health
///
/// Reports `degraded` (still 200) when no model provider is configured, since
/// snapshots and exports keep working.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status, message) = if state.model_configured {
        (HealthStatus::Healthy, None)
    } else {
        (
            HealthStatus::Degraded,
            Some("No model provider configured".to_string()),
        )
    };
    let response = HealthResponse {
        status,
        message,
        details: Some(HealthDetails {
            model_configured: state.model_configured,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() -> Result<(), serde_json::Error> {
        let response = HealthResponse {
            status: HealthStatus::Degraded,
            message: None,
            details: None,
        };
        let json = serde_json::to_value(&response)?;
        assert_eq!(json, serde_json::json!({"status": "degraded"}));
        Ok(())
    }
}
