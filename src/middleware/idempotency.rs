//! Client idempotency keys for the mutating user routes, backed by Redis.
//!
//! A request carrying `x-idempotency-key` is run at most once per
//! (user, route, key). A repeat while the first is in flight gets 409; a
//! repeat after it succeeded gets the stored response back.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::middleware::auth::USER_ID_HEADER;
use crate::AppState;

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

const IDEMPOTENCY_TTL_SECS: u64 = 86_400;
const IN_FLIGHT_TTL_SECS: u64 = 300;
const IN_FLIGHT: &str = "PROCESSING";
const KEY_PREFIX: &str = "idempotency:";
const MAX_CACHED_BODY: usize = 64 * 1024;

#[derive(Clone)]
pub struct IdempotencyService {
    redis_client: redis::Client,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    status: u16,
    body: String,
}

#[derive(Debug)]
pub enum IdempotencyStatus {
    New,
    Processing,
    Completed(CachedResponse),
}

/// Redis key for one client key, scoped to the caller and route.
pub fn scoped_key(user: &str, method: &str, path: &str, client_key: &str) -> String {
    format!("{}{}:{}:{}:{}", KEY_PREFIX, user, method, path, client_key)
}

impl IdempotencyService {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    /// Claims `key` for this request, or reports what an earlier request with
    /// the same key left behind.
    pub async fn begin(&self, key: &str) -> anyhow::Result<IdempotencyStatus> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;

        let claimed: bool = redis::cmd("SET")
            .arg(key)
            .arg(IN_FLIGHT)
            .arg("NX")
            .arg("EX")
            .arg(IN_FLIGHT_TTL_SECS)
            .query_async::<_, Option<String>>(&mut conn)
            .await?
            .is_some();
        if claimed {
            return Ok(IdempotencyStatus::New);
        }

        let existing: Option<String> = conn.get(key).await?;
        match existing.as_deref() {
            None | Some(IN_FLIGHT) => Ok(IdempotencyStatus::Processing),
            Some(stored) => Ok(IdempotencyStatus::Completed(serde_json::from_str(stored)?)),
        }
    }

    pub async fn complete(&self, key: &str, status: u16, body: String) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(&CachedResponse { status, body })?;
        let _: () = conn.set_ex(key, serialized, IDEMPOTENCY_TTL_SECS).await?;
        Ok(())
    }

    pub async fn release(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn replay(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, cached.body).into_response();
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert("x-idempotent-replay", HeaderValue::from_static("true"));
    response
}

pub async fn idempotency_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(service) = state.idempotency.clone() else {
        return next.run(request).await;
    };
    let Some(raw_key) = request.headers().get(IDEMPOTENCY_HEADER) else {
        return next.run(request).await;
    };
    let client_key = match raw_key.to_str() {
        Ok(k) if !k.is_empty() && k.len() <= 128 => k.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid idempotency key", "status": 400})),
            )
                .into_response();
        }
    };
    let user = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    let key = scoped_key(&user, request.method().as_str(), request.uri().path(), &client_key);

    match service.begin(&key).await {
        Ok(IdempotencyStatus::New) => {
            let response = next.run(request).await;
            if !response.status().is_success() {
                if let Err(e) = service.release(&key).await {
                    tracing::error!(error = %e, "failed to release idempotency key");
                }
                return response;
            }

            let (parts, body) = response.into_parts();
            let bytes = match to_bytes(body, MAX_CACHED_BODY).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(error = %e, "response body too large to cache");
                    return (StatusCode::INTERNAL_SERVER_ERROR, "response body unavailable").into_response();
                }
            };
            let body = String::from_utf8_lossy(&bytes).into_owned();
            if let Err(e) = service.complete(&key, parts.status.as_u16(), body).await {
                tracing::error!(error = %e, "failed to store idempotent response");
            }
            Response::from_parts(parts, Body::from(bytes))
        }
        Ok(IdempotencyStatus::Processing) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "A request with this idempotency key is still being processed",
                "status": 409
            })),
        )
            .into_response(),
        Ok(IdempotencyStatus::Completed(cached)) => {
            tracing::debug!(%user, "idempotent replay");
            replay(cached)
        }
        Err(e) => {
            tracing::error!(error = %e, "idempotency check failed, continuing without it");
            next.run(request).await
        }
    }
}
