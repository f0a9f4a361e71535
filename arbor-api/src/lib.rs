//! ARBOR API - HTTP surface for the tree edit planner
//!
//! Exposes plan proposal, plan execution, combined assist, snapshots and
//! exports over Axum. The acting user is identified by the `x-user-id`
//! header; permission checks happen in the planner service.

pub mod config;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, LogFormat};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{ActingUser, TreePath, USER_ID_HEADER};
pub use routes::create_api_router;
pub use state::{seed_tree, AppState, SeedError, UnconfiguredModel};
