pub mod orders;
pub mod payments;
pub mod withdrawals;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::check_health;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check_health(
        state.store.clone(),
        state.idempotency.clone(),
        state.gateway.as_ref(),
        state.provisioner.as_ref(),
    )
    .await;

    let status = if report.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}
