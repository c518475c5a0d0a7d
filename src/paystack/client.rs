use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::ports::{InitializeRequest, InitializedPayment, PaymentGateway};

/// Failure kinds of a gateway call. They all reach the end user as a generic
/// "try again", but stay distinct for logs and retry decisions.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("connection to payment gateway failed: {0}")]
    Connection(String),
    #[error("payment gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid response from payment gateway: {0}")]
    Parse(String),
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Connection(_) => "connection",
            GatewayError::Http { .. } => "http",
            GatewayError::Parse(_) => "parse",
            GatewayError::CircuitOpen(_) => "circuit_open",
        }
    }

    /// Whether the failure says something about the gateway's health.
    /// Requests it refuses as invalid leave the breaker alone.
    pub fn trips_breaker(&self) -> bool {
        match self {
            GatewayError::Connection(_) | GatewayError::Parse(_) => true,
            GatewayError::Http { status, .. } => *status >= 500 || *status == 429,
            GatewayError::CircuitOpen(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
    #[serde(default)]
    access_code: Option<String>,
}

/// HTTP client for the Paystack transaction API.
#[derive(Clone)]
pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl PaystackClient {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, secret_key, timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        secret_key: String,
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

        PaystackClient {
            client,
            base_url,
            secret_key,
            circuit_breaker,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializedPayment, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url.trim_end_matches('/'));
        let client = self.client.clone();
        let secret_key = self.secret_key.clone();
        let body = json!({
            "email": request.email,
            "amount": request.amount_minor.to_string(),
            "reference": request.reference,
            "metadata": request.metadata.to_value(),
        });

        let result = self
            .circuit_breaker
            .call_with(GatewayError::trips_breaker, async move {
                let response = client
                    .post(&url)
                    .bearer_auth(secret_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| GatewayError::Connection(e.to_string()))?;

                let status = response.status();
                let text = response
                    .text()
                    .await
                    .map_err(|e| GatewayError::Connection(e.to_string()))?;

                if !status.is_success() {
                    return Err(GatewayError::Http {
                        status: status.as_u16(),
                        body: text,
                    });
                }

                let envelope: Envelope<InitializeData> =
                    serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))?;

                match envelope {
                    Envelope {
                        status: true,
                        data: Some(data),
                        ..
                    } => Ok(InitializedPayment {
                        authorization_url: data.authorization_url,
                        reference: data.reference,
                        access_code: data.access_code,
                    }),
                    Envelope { message, .. } => Err(GatewayError::Parse(
                        message.unwrap_or_else(|| "response carried no data".to_string()),
                    )),
                }
            })
            .await;

        match result {
            Ok(payment) => Ok(payment),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitOpen(
                "payment gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paystack_client_creation() {
        let client = PaystackClient::new(
            "https://api.paystack.co".to_string(),
            "sk_test_x".to_string(),
            Duration::from_secs(5),
        );
        assert_eq!(client.base_url, "https://api.paystack.co");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn caller_errors_do_not_trip_breaker() {
        let bad_request = GatewayError::Http {
            status: 400,
            body: "Invalid email".to_string(),
        };
        assert!(!bad_request.trips_breaker());
        assert!(GatewayError::Http {
            status: 502,
            body: String::new()
        }
        .trips_breaker());
        assert!(GatewayError::Connection("reset".into()).trips_breaker());
    }

    #[test]
    fn error_kinds_are_distinct() {
        let kinds = [
            GatewayError::Connection("refused".into()).kind(),
            GatewayError::Http {
                status: 400,
                body: String::new(),
            }
            .kind(),
            GatewayError::Parse("eof".into()).kind(),
            GatewayError::CircuitOpen("open".into()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
