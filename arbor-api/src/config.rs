//! API Configuration Module
//!
//! Server, seeding, model-provider and logging settings. Loaded from
//! environment variables with development defaults.

use crate::error::{ApiError, ApiResult};
use arbor_core::{EntityIdType, UserId};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::invalid_input(format!(
                "Invalid log format '{}', expected 'pretty' or 'json'",
                other
            ))),
        }
    }
}

/// Settings for the API binary.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Server
    // ========================================================================
    pub bind_host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows all (dev mode).
    pub cors_origins: Vec<String>,
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Seeding
    // ========================================================================
    /// Tree export JSON files imported into the in-memory store at startup.
    pub tree_seed_paths: Vec<PathBuf>,
    /// Users granted write access to every seeded tree.
    pub seed_owners: Vec<UserId>,

    // ========================================================================
    // Model provider
    // ========================================================================
    /// Without a key the planner answers every query with a provider error.
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: i32,
    pub requests_per_minute: u32,

    // ========================================================================
    // Logging
    // ========================================================================
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            tree_seed_paths: Vec::new(),
            seed_owners: Vec::new(),
            openai_api_key: None,
            openai_base_url: None,
            openai_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            requests_per_minute: 500,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ARBOR_API_BIND`: bind host (default: 0.0.0.0)
    /// - `PORT` or `ARBOR_API_PORT`: port (default: 3000)
    /// - `ARBOR_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `ARBOR_CORS_MAX_AGE_SECS`: preflight cache duration (default: 86400)
    /// - `ARBOR_TREE_SEEDS`: comma-separated tree export JSON paths
    /// - `ARBOR_SEED_OWNERS`: comma-separated user UUIDs granted write access
    /// - `ARBOR_OPENAI_API_KEY` or `OPENAI_API_KEY`: provider key
    /// - `ARBOR_OPENAI_BASE_URL`: OpenAI-compatible endpoint
    /// - `ARBOR_OPENAI_MODEL`: chat model (default: gpt-4o-mini)
    /// - `ARBOR_EMBEDDING_MODEL`: embedding model (default: text-embedding-3-small)
    /// - `ARBOR_EMBEDDING_DIMENSIONS`: embedding width (default: 1536)
    /// - `ARBOR_OPENAI_RPM`: client-side request budget per minute (default: 500)
    /// - `ARBOR_LOG_FORMAT`: "pretty" or "json" (default: pretty)
    pub fn from_env() -> ApiResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT").or_else(|| var("ARBOR_API_PORT")) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", raw)))?,
            None => defaults.port,
        };

        let cors_max_age_secs = match var("ARBOR_CORS_MAX_AGE_SECS") {
            Some(raw) => parse_number("ARBOR_CORS_MAX_AGE_SECS", &raw)?,
            None => defaults.cors_max_age_secs,
        };
        let embedding_dimensions = match var("ARBOR_EMBEDDING_DIMENSIONS") {
            Some(raw) => parse_number("ARBOR_EMBEDDING_DIMENSIONS", &raw)?,
            None => defaults.embedding_dimensions,
        };
        let requests_per_minute = match var("ARBOR_OPENAI_RPM") {
            Some(raw) => parse_number("ARBOR_OPENAI_RPM", &raw)?,
            None => defaults.requests_per_minute,
        };

        let seed_owners = split_list(var("ARBOR_SEED_OWNERS"))
            .into_iter()
            .map(|raw| {
                Uuid::parse_str(&raw)
                    .map(UserId::new)
                    .map_err(|_| ApiError::invalid_format("ARBOR_SEED_OWNERS", "comma-separated UUIDs"))
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let log_format = match var("ARBOR_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => defaults.log_format,
        };

        Ok(Self {
            bind_host: var("ARBOR_API_BIND").unwrap_or(defaults.bind_host),
            port,
            cors_origins: split_list(var("ARBOR_CORS_ORIGINS")),
            cors_max_age_secs,
            tree_seed_paths: split_list(var("ARBOR_TREE_SEEDS"))
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            seed_owners,
            openai_api_key: var("ARBOR_OPENAI_API_KEY").or_else(|| var("OPENAI_API_KEY")),
            openai_base_url: var("ARBOR_OPENAI_BASE_URL"),
            openai_model: var("ARBOR_OPENAI_MODEL").unwrap_or(defaults.openai_model),
            embedding_model: var("ARBOR_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimensions,
            requests_per_minute,
            log_format,
        })
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
        })
    }

    pub fn model_configured(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> ApiResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::invalid_input(format!("Invalid value for {}: {}", key, raw)))
}
