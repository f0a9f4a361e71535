//! Request extractors for the acting user and typed tree ids.

use crate::error::ApiError;
use arbor_core::{EntityIdType, TreeId, UserId};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use uuid::Uuid;

/// Header carrying the acting user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user on whose behalf the request runs.
///
/// Identity is taken as given; authentication happens in front of this
/// service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing x-user-id header"))?
            .to_str()
            .map_err(|_| ApiError::invalid_format(USER_ID_HEADER, "valid UUID"))?;
        let uuid = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::invalid_format(USER_ID_HEADER, "valid UUID"))?;
        Ok(ActingUser(UserId::new(uuid)))
    }
}

/// `:tree_id` path parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreePath(pub TreeId);

#[async_trait]
impl<S> FromRequestParts<S> for TreePath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(uuid): Path<Uuid> = Path::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                ApiError::invalid_format("tree_id", "valid UUID")
                    .with_details(serde_json::json!({ "reason": e.body_text() }))
            })?;
        Ok(TreePath(TreeId::new(uuid)))
    }
}
