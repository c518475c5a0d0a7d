use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::CurrentUser;
use crate::services::WithdrawalInput;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct Resolution {
    pub approve: bool,
}

pub async fn request(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<WithdrawalInput>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.settlement.request_withdrawal(&user, input).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn resolve(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(resolution): Json<Resolution>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state
            .settlement
            .resolve_withdrawal(&user, id, resolution.approve)
            .await?,
    ))
}
