#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use bundle_core::adapters::InMemoryStore;
use bundle_core::config::AllowedIps;
use bundle_core::domain::{Audience, BundlePlan, OrderStatus, Role, User};
use bundle_core::paystack::{sign, GatewayError};
use bundle_core::ports::{
    InitializeRequest, InitializedPayment, PaymentGateway, ProvisionRequest, ProvisionedOrder,
    Provisioner, UpstreamOrderStatus,
};
use bundle_core::provisioning::ProvisioningError;
use bundle_core::services::RetryPolicy;
use bundle_core::{AppSettings, AppState};

pub const SECRET: &str = "sk_test_webhook_secret";

pub fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

/// Payment gateway that records requests and answers from a switch.
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<InitializeRequest>>,
    fail: AtomicBool,
}

impl FakeGateway {
    pub fn fail_with_connection_error(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last(&self) -> InitializeRequest {
        self.requests.lock().unwrap().last().cloned().expect("no gateway call")
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializedPayment, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("connection refused".to_string()));
        }
        Ok(InitializedPayment {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            reference: request.reference.clone(),
            access_code: Some("ac_test".to_string()),
        })
    }

    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}

/// Provisioning API double. `create_order` pops scripted results and falls
/// back to a pending order with a fresh id.
#[derive(Default)]
pub struct FakeProvisioner {
    pub created: Mutex<Vec<ProvisionRequest>>,
    scripted: Mutex<VecDeque<Result<ProvisionedOrder, ProvisioningError>>>,
    statuses: Mutex<Vec<UpstreamOrderStatus>>,
    status_failures: AtomicU32,
    pub status_calls: AtomicU32,
    delay: Mutex<Option<Duration>>,
    counter: AtomicU32,
}

impl FakeProvisioner {
    pub fn push_result(&self, result: Result<ProvisionedOrder, ProvisioningError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn fail_next(&self, err: ProvisioningError) {
        self.push_result(Err(err));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_status(&self, external_id: &str, status: OrderStatus) {
        self.statuses.lock().unwrap().push(UpstreamOrderStatus {
            external_id: external_id.to_string(),
            status,
        });
    }

    /// The next `n` status lookups fail with a connection error.
    pub fn fail_status_lookups(&self, n: u32) {
        self.status_failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn create_order(&self, request: &ProvisionRequest) -> Result<ProvisionedOrder, ProvisioningError> {
        self.created.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(ProvisionedOrder {
                external_id: format!("EXT-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1),
                status: OrderStatus::Pending,
            }),
        }
    }

    async fn order_statuses(&self, external_ids: &[String]) -> Result<Vec<UpstreamOrderStatus>, ProvisioningError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.status_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.status_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProvisioningError::Connection("timed out".to_string()));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|s| external_ids.contains(&s.external_id))
            .cloned()
            .collect())
    }

    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}

pub fn settings() -> AppSettings {
    AppSettings {
        paystack_secret_key: SECRET.to_string(),
        agent_registration_fee: dec("50.00"),
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        webhook_allowed_ips: AllowedIps::Any,
        trusted_proxy_depth: 0,
    }
}

pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: Arc<FakeGateway>,
    pub provisioner: Arc<FakeProvisioner>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: AppSettings) -> Self {
        let store = InMemoryStore::new();
        let gateway = Arc::new(FakeGateway::default());
        let provisioner = Arc::new(FakeProvisioner::default());
        let state = AppState::new(
            Arc::new(store.clone()),
            gateway.clone(),
            provisioner.clone(),
            settings,
        );
        Self {
            store,
            gateway,
            provisioner,
            state,
        }
    }

    pub async fn user(&self, role: Role, balance: &str) -> User {
        let email = format!("{}-{}@example.com", role, Uuid::new_v4().simple());
        self.store.seed_user(User::new(email, role), dec(balance)).await
    }

    pub async fn plan(&self, creator: &User, price: &str, audience: Audience) -> BundlePlan {
        self.store
            .seed_plan(BundlePlan::new(
                Uuid::new_v4(),
                creator.id,
                "5GB",
                "30 days",
                dec(price),
                audience,
            ))
            .await
    }

    pub async fn balance(&self, user: &User) -> BigDecimal {
        self.store.balance(user.id).await.expect("wallet")
    }
}

/// A signed `charge.success` webhook body and its signature.
pub fn charge_success(amount_minor: i64, reference: &str, metadata: serde_json::Value) -> (Vec<u8>, String) {
    let body = serde_json::json!({
        "event": "charge.success",
        "data": {
            "id": 302961,
            "status": "success",
            "amount": amount_minor,
            "currency": "GHS",
            "reference": reference,
            "metadata": metadata,
        }
    })
    .to_string()
    .into_bytes();
    let signature = sign(SECRET, &body);
    (body, signature)
}
