//! Caller identity. Authentication happens in front of this service, which
//! forwards the authenticated user's id in `x-user-id`.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::domain::User;
use crate::error::AppError;
use crate::ports::Repository;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The user making the request, loaded from the store.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| AppError::Unauthorized("missing or invalid caller identity".to_string()))?;

        let mut uow = state.store.begin().await?;
        let user = Repository::<User>::find(&mut *uow, id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("unknown caller".to_string()))?;
        Ok(CurrentUser(user))
    }
}
