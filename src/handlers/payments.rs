use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde_json::json;

use crate::error::AppError;
use crate::middleware::auth::CurrentUser;
use crate::paystack::SIGNATURE_HEADER;
use crate::services::{PaymentPurpose, PurchaseInput};
use crate::AppState;

pub async fn initialize(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(purpose): Json<PaymentPurpose>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.settlement.initialize_payment(&user, purpose).await?))
}

pub async fn agent_purchase(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<PurchaseInput>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state.settlement.initialize_agent_purchase(&user, input).await?,
    ))
}

/// Gateway webhook. Answers 2xx for every authentic, well-formed event so
/// the gateway stops redelivering; processing failures are only logged.
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state.webhooks.handle_event(&body, signature).await?;
    Ok(Json(json!({ "received": true, "result": outcome })))
}
