use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::auth::CurrentUser;
use crate::middleware::idempotency::IDEMPOTENCY_HEADER;
use crate::policy::{authorize, Operation};
use crate::services::PurchaseInput;
use crate::AppState;

const DEFAULT_SYNC_LIMIT: i64 = 50;
const MAX_SYNC_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub limit: Option<i64>,
}

pub async fn buy(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Json(input): Json<PurchaseInput>,
) -> Result<impl IntoResponse, AppError> {
    let request_key = headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok());
    let order = state.settlement.buy_with_key(&user, input, request_key).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn my_orders(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.settlement.orders_for(&user).await?))
}

pub async fn sync(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<SyncParams>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&user, Operation::SyncOrders)?;
    let limit = params.limit.unwrap_or(DEFAULT_SYNC_LIMIT);
    if !(1..=MAX_SYNC_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_SYNC_LIMIT
        )));
    }
    Ok(Json(state.order_sync.sync_order_statuses(limit).await?))
}
