use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::domain::OrderStatus;
use crate::ports::{ProvisionRequest, ProvisionedOrder, Provisioner, UpstreamOrderStatus};

#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// The upstream signals it cannot serve orders right now (HTTP 402).
    #[error("provisioning service unavailable: {0}")]
    Unavailable(String),
    #[error("connection to provisioning API failed: {0}")]
    Connection(String),
    #[error("provisioning API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid response from provisioning API: {0}")]
    Parse(String),
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),
}

impl ProvisioningError {
    /// Whether repeating the same idempotent request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisioningError::Connection(_) | ProvisioningError::Unavailable(_) => true,
            ProvisioningError::Http { status, .. } => *status >= 500 || *status == 429,
            ProvisioningError::Parse(_) | ProvisioningError::CircuitOpen(_) => false,
        }
    }

    /// Whether the failure says something about the upstream's health.
    /// Orders it rejects as invalid (a bad beneficiary, say) leave the
    /// breaker alone.
    pub fn trips_breaker(&self) -> bool {
        match self {
            ProvisioningError::Parse(_) => true,
            ProvisioningError::CircuitOpen(_) => false,
            other => other.is_transient(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultsEnvelope {
    data: ResultsData,
}

#[derive(Debug, Deserialize)]
struct ResultsData {
    api_results: Vec<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    order_id: Value,
    #[serde(default)]
    status: Option<String>,
}

impl ApiResult {
    fn external_id(&self) -> Option<String> {
        match &self.order_id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn status(&self) -> OrderStatus {
        self.status
            .as_deref()
            .map(OrderStatus::from_upstream)
            .unwrap_or(OrderStatus::Pending)
    }
}

/// HTTP client for the data-bundle provisioning API.
#[derive(Clone)]
pub struct ProvisioningClient {
    client: Client,
    base_url: String,
    api_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl ProvisioningClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, api_key, timeout, 5, 30)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ProvisioningClient {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, ProvisioningError>
    where
        T: Send,
        F: std::future::Future<Output = Result<T, ProvisioningError>> + Send,
    {
        match self.circuit_breaker.call_with(ProvisioningError::trips_breaker, call).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ProvisioningError::CircuitOpen(
                "provisioning API circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

async fn read_results(response: reqwest::Response) -> Result<Vec<ApiResult>, ProvisioningError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProvisioningError::Connection(e.to_string()))?;

    if status == StatusCode::PAYMENT_REQUIRED {
        return Err(ProvisioningError::Unavailable(text));
    }
    if !status.is_success() {
        return Err(ProvisioningError::Http {
            status: status.as_u16(),
            body: text,
        });
    }

    let envelope: ResultsEnvelope =
        serde_json::from_str(&text).map_err(|e| ProvisioningError::Parse(e.to_string()))?;
    Ok(envelope.data.api_results)
}

#[async_trait]
impl Provisioner for ProvisioningClient {
    async fn create_order(&self, request: &ProvisionRequest) -> Result<ProvisionedOrder, ProvisioningError> {
        let request_builder = self
            .client
            .post(self.url("/api/create_order.php"))
            .header("x-api-key", &self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&json!({
                "beneficiary": request.beneficiary,
                "package_size": request.package_size,
            }));

        self.guarded(async move {
            let response = request_builder
                .send()
                .await
                .map_err(|e| ProvisioningError::Connection(e.to_string()))?;

            let results = read_results(response).await?;
            let first = results
                .first()
                .ok_or_else(|| ProvisioningError::Parse("api_results is empty".to_string()))?;
            let external_id = first
                .external_id()
                .ok_or_else(|| ProvisioningError::Parse("api_results[0].order_id missing".to_string()))?;

            Ok(ProvisionedOrder {
                external_id,
                status: first.status(),
            })
        })
        .await
    }

    async fn order_statuses(&self, external_ids: &[String]) -> Result<Vec<UpstreamOrderStatus>, ProvisioningError> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }

        let request_builder = self
            .client
            .get(self.url("/api/check_order_status.php"))
            .header("x-api-key", &self.api_key)
            .query(&[("order_ids", external_ids.join(","))]);

        self.guarded(async move {
            let response = request_builder
                .send()
                .await
                .map_err(|e| ProvisioningError::Connection(e.to_string()))?;

            let results = read_results(response).await?;
            Ok(results
                .iter()
                .filter_map(|r| {
                    r.external_id().map(|external_id| UpstreamOrderStatus {
                        external_id,
                        status: r.status(),
                    })
                })
                .collect())
        })
        .await
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}
