use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};

use crate::errors::ServiceError;

/// Caller identity established by the upstream auth gateway, which injects
/// the authenticated user id as an `x-user-id` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| ServiceError::Unauthorized("Missing user identity".to_string()))?;

        Ok(AuthUser { user_id })
    }
}
