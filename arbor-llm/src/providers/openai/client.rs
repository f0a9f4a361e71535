//! OpenAI HTTP client with rate limiting

use super::types::ErrorEnvelope;
use crate::providers::{invalid_response, rate_limited, request_failed};
use arbor_core::ArborResult;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

/// OpenAI API client with rate limiting.
///
/// Cheap to clone; clones share the rate limiter.
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
    last_request: Arc<AtomicU64>,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl OpenAIClient {
    /// Create a new client allowing `requests_per_minute` requests.
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        let min_interval_ms = (60_000 / rpm as u64).max(10);

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limiter: Arc::new(Semaphore::new(rpm as usize)),
            last_request: Arc::new(AtomicU64::new(0)),
            min_request_interval_ms: min_interval_ms,
            start_time: Instant::now(),
        }
    }

    /// Point at an OpenAI-compatible endpoint other than the default.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `endpoint` (relative to the base URL) and decode the
    /// JSON reply. Every call passes through the client's throttle first.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> ArborResult<Res> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("throttle closed: {}", e)))?;
        self.wait_for_slot().await;

        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        tracing::debug!(%url, "openai request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("transport error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| invalid_response(PROVIDER, format!("undecodable body: {}", e)));
        }

        let retry_after = retry_after_ms(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => rate_limited(PROVIDER, retry_after.unwrap_or(0)),
            _ => request_failed(PROVIDER, i32::from(status.as_u16()), provider_message(&body)),
        })
    }

    /// Sleep until `min_request_interval_ms` has passed since the last call.
    async fn wait_for_slot(&self) {
        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let previous = self.last_request.swap(now_ms.max(1), Ordering::Relaxed);
        if previous == 0 {
            return;
        }
        let gap = now_ms.saturating_sub(previous);
        if gap < self.min_request_interval_ms {
            tokio::time::sleep(Duration::from_millis(self.min_request_interval_ms - gap)).await;
        }
    }
}

/// Prefer the structured `error.message`; fall back to the raw body.
fn provider_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "empty error body".to_string(),
        Err(_) => body.to_string(),
    }
}

fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    let seconds: f64 = headers.get("retry-after")?.to_str().ok()?.trim().parse().ok()?;
    Some((seconds * 1000.0) as i64)
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_retry_after_parses_fractional_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(retry_after_ms(&headers), Some(1500));
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }

    #[test]
    fn test_provider_message_prefers_structured_error() {
        let body = r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#;
        assert_eq!(provider_message(body), "model not found");
        assert_eq!(provider_message("bad gateway"), "bad gateway");
        assert_eq!(provider_message("  "), "empty error body");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAIClient::new("sk-secret", 60).with_base_url("http://localhost:8080/v1/");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-secret"));
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }
}
