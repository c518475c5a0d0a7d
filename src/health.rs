use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::middleware::idempotency::IdempotencyService;
use crate::ports::{PaymentGateway, Provisioner, Store};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dependencies: BTreeMap<String, DependencyStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Circuit { status: String, circuit: String },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }

    /// Outbound clients are not probed; their breaker state is reported.
    fn circuit(state: String) -> Self {
        let status = if state == "closed" { "healthy" } else { "unhealthy" };
        DependencyStatus::Circuit {
            status: status.to_string(),
            circuit: state,
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self {
            DependencyStatus::Healthy { .. } => true,
            DependencyStatus::Circuit { status, .. } => status == "healthy",
            DependencyStatus::Unhealthy { .. } => false,
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct StoreChecker(pub Arc<dyn Store>);

#[async_trait]
impl DependencyChecker for StoreChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.0.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct RedisChecker(pub IdempotencyService);

#[async_trait]
impl DependencyChecker for RedisChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.0.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

async fn bounded(checker: &dyn DependencyChecker) -> DependencyStatus {
    timeout(CHECK_TIMEOUT, checker.check())
        .await
        .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"))
}

pub async fn check_health(
    store: Arc<dyn Store>,
    redis: Option<IdempotencyService>,
    gateway: &dyn PaymentGateway,
    provisioner: &dyn Provisioner,
) -> HealthResponse {
    let mut dependencies = BTreeMap::new();
    dependencies.insert("store".to_string(), bounded(&StoreChecker(store)).await);
    if let Some(redis) = redis {
        dependencies.insert("redis".to_string(), bounded(&RedisChecker(redis)).await);
    }
    dependencies.insert(
        "payment_gateway".to_string(),
        DependencyStatus::circuit(gateway.circuit_state()),
    );
    dependencies.insert(
        "provisioning".to_string(),
        DependencyStatus::circuit(provisioner.circuit_state()),
    );

    HealthResponse {
        status: overall_status(&dependencies).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies,
    }
}

/// The store is critical; anything else failing only degrades the service.
pub fn overall_status(dependencies: &BTreeMap<String, DependencyStatus>) -> &'static str {
    let mut degraded = false;
    for (name, status) in dependencies {
        if !status.is_healthy() {
            if name == "store" {
                return "unhealthy";
            }
            degraded = true;
        }
    }
    if degraded {
        "degraded"
    } else {
        "healthy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(entries: &[(&str, DependencyStatus)]) -> BTreeMap<String, DependencyStatus> {
        entries
            .iter()
            .map(|(name, status)| (name.to_string(), status.clone()))
            .collect()
    }

    #[test]
    fn store_failure_is_unhealthy() {
        let d = deps(&[
            ("store", DependencyStatus::unhealthy("refused")),
            ("provisioning", DependencyStatus::circuit("closed".into())),
        ]);
        assert_eq!(overall_status(&d), "unhealthy");
    }

    #[test]
    fn open_circuit_degrades() {
        let d = deps(&[
            ("store", DependencyStatus::healthy(Instant::now())),
            ("payment_gateway", DependencyStatus::circuit("open".into())),
        ]);
        assert_eq!(overall_status(&d), "degraded");
    }

    #[test]
    fn all_healthy() {
        let d = deps(&[
            ("store", DependencyStatus::healthy(Instant::now())),
            ("provisioning", DependencyStatus::circuit("closed".into())),
        ]);
        assert_eq!(overall_status(&d), "healthy");
    }
}
