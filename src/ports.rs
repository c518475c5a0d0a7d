//! Ports: the seams between the settlement core and its collaborators.
//!
//! Persistence is reached through a [`Store`] that opens one [`UnitOfWork`]
//! per business operation; every write made through a unit becomes visible
//! at `commit` or not at all. The payment gateway and the provisioning API
//! sit behind [`PaymentGateway`] and [`Provisioner`].

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    BundlePlan, ChargeMetadata, Order, OrderStatus, PaymentRequest, PaymentRequestStatus, Role,
    Transaction, TransactionStatus, User, Wallet,
};
use crate::paystack::GatewayError;
use crate::provisioning::ProvisioningError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        balance: BigDecimal,
        required: BigDecimal,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A persisted row addressed by a UUID primary key.
pub trait Entity: Clone + Send + Sync + 'static {
    const NAME: &'static str;

    fn id(&self) -> Uuid;
}

impl Entity for User {
    const NAME: &'static str = "user";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for BundlePlan {
    const NAME: &'static str = "plan";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Transaction {
    const NAME: &'static str = "transaction";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Order {
    const NAME: &'static str = "order";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for PaymentRequest {
    const NAME: &'static str = "payment request";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Typed lookup and insert for one entity type.
#[async_trait]
pub trait Repository<E: Entity>: Send {
    async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<E>>;

    async fn insert(&mut self, entity: &E) -> RepositoryResult<E>;

    async fn get(&mut self, id: Uuid) -> RepositoryResult<E> {
        self.find(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("{} {}", E::NAME, id)))
    }
}

#[async_trait]
pub trait LedgerRepository: Repository<Transaction> {
    async fn open_wallet(&mut self, user_id: Uuid) -> RepositoryResult<Wallet>;

    /// Reads the wallet and holds its row lock until the unit ends.
    async fn wallet_for_update(&mut self, user_id: Uuid) -> RepositoryResult<Wallet>;

    /// Atomically applies `delta` to the balance. A debit that would take the
    /// balance below zero fails with `InsufficientFunds` and changes nothing.
    async fn adjust_balance(&mut self, user_id: Uuid, delta: &BigDecimal) -> RepositoryResult<Wallet>;

    /// Moves an `incomplete` transaction to `status`; any other starting
    /// status is a `Conflict`.
    async fn set_transaction_status(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<Transaction>;

    async fn set_transaction_reference(&mut self, id: Uuid, reference: &str) -> RepositoryResult<Transaction>;

    async fn record_transaction(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        Repository::<Transaction>::insert(self, tx).await
    }
}

#[async_trait]
pub trait OrderRepository: Repository<Order> + Repository<BundlePlan> {
    /// Moves a still-pending order to a final status. Returns `false` when
    /// the order had already left `pending`, so overlapping syncs apply once.
    async fn finish_pending_order(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    async fn orders_for_customer(&mut self, customer_id: Uuid) -> RepositoryResult<Vec<Order>>;

    /// Oldest pending orders that carry a provisioning id.
    async fn pending_orders(&mut self, limit: i64) -> RepositoryResult<Vec<Order>>;

    async fn get_plan(&mut self, id: Uuid) -> RepositoryResult<BundlePlan> {
        Repository::<BundlePlan>::get(self, id).await
    }

    async fn create_order(&mut self, order: &Order) -> RepositoryResult<Order> {
        Repository::<Order>::insert(self, order).await
    }
}

#[async_trait]
pub trait UserRepository: Repository<User> {
    async fn set_role(&mut self, id: Uuid, role: Role) -> RepositoryResult<User>;
}

#[async_trait]
pub trait PaymentRequestRepository: Repository<PaymentRequest> {
    /// Resolves a `pending` request; any other starting status is a `Conflict`.
    async fn resolve_payment_request(
        &mut self,
        id: Uuid,
        status: PaymentRequestStatus,
    ) -> RepositoryResult<PaymentRequest>;
}

#[async_trait]
pub trait WebhookLog: Send {
    /// Records that the gateway event `reference` is being applied. Returns
    /// false when it was already claimed by a committed unit.
    async fn claim_reference(&mut self, reference: &str, charge_for: &str) -> RepositoryResult<bool>;
}

/// One transactional boundary. Dropping a unit without committing discards
/// every write made through it.
#[async_trait]
pub trait UnitOfWork:
    LedgerRepository + OrderRepository + UserRepository + PaymentRequestRepository + WebhookLog
{
    async fn commit(&mut self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

/// Payment initialization request in gateway terms.
#[derive(Debug, Clone)]
pub struct InitializeRequest {
    pub email: String,
    pub amount_minor: i64,
    /// Client-chosen reference; the gateway rejects duplicates, which makes
    /// a retried initialize safe.
    pub reference: String,
    pub metadata: ChargeMetadata,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub reference: String,
    pub access_code: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: &InitializeRequest) -> Result<InitializedPayment, GatewayError>;

    fn circuit_state(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub beneficiary: String,
    pub package_size: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedOrder {
    pub external_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamOrderStatus {
    pub external_id: String,
    pub status: OrderStatus,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_order(&self, request: &ProvisionRequest) -> Result<ProvisionedOrder, ProvisioningError>;

    async fn order_statuses(&self, external_ids: &[String]) -> Result<Vec<UpstreamOrderStatus>, ProvisioningError>;

    fn circuit_state(&self) -> String;
}
