use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use uuid::Uuid;

use crate::utils::sanitize::sanitize_json;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_BODY_LOG_SIZE: usize = 16 * 1024;

fn body_logging_enabled() -> bool {
    std::env::var("LOG_REQUEST_BODY")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn describe_body(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => sanitize_json(&json).to_string(),
        Err(_) => format!("[non-json, {} bytes]", bytes.len()),
    }
}

/// Tags each request with an `x-request-id` (reusing the caller's when
/// present) and logs it with status and latency.
pub async fn request_logger_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header_value.clone() {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    if body_logging_enabled() {
        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, MAX_BODY_LOG_SIZE).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(%request_id, %method, %uri, "request body too large to log");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };
        tracing::info!(%request_id, %method, %uri, body = %describe_body(&bytes), "incoming request");
        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!(%request_id, %method, %uri, "incoming request");
    }

    let mut response = next.run(req).await;

    tracing::info!(
        %request_id,
        %method,
        %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
