//! In-memory implementation of the store ports.
//!
//! A unit of work holds the store's single async mutex for its whole
//! lifetime and stages writes on a copy of the state, so units are fully
//! serialized and an uncommitted unit leaves no trace.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    BundlePlan, Order, OrderStatus, PaymentRequest, PaymentRequestStatus, Role, Transaction,
    TransactionStatus, User, Wallet,
};
use crate::ports::{
    Entity, LedgerRepository, OrderRepository, PaymentRequestRepository, Repository,
    RepositoryError, RepositoryResult, Store, UnitOfWork, UserRepository, WebhookLog,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    wallets: HashMap<Uuid, Wallet>,
    plans: HashMap<Uuid, BundlePlan>,
    transactions: HashMap<Uuid, Transaction>,
    orders: HashMap<Uuid, Order>,
    payment_requests: HashMap<Uuid, PaymentRequest>,
    webhook_events: HashMap<String, String>,
}

/// A thread-safe in-memory store. Ideal for tests and local runs where
/// persistence is not required.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user together with a wallet holding `balance`.
    pub async fn seed_user(&self, user: User, balance: BigDecimal) -> User {
        let mut state = self.state.lock().await;
        let mut wallet = Wallet::new(user.id);
        wallet.balance = crate::domain::money::normalize(&balance);
        state.wallets.insert(user.id, wallet);
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn seed_plan(&self, plan: BundlePlan) -> BundlePlan {
        self.state.lock().await.plans.insert(plan.id, plan.clone());
        plan
    }

    pub async fn set_plan_price(&self, plan_id: Uuid, price: BigDecimal) {
        if let Some(plan) = self.state.lock().await.plans.get_mut(&plan_id) {
            plan.base_price = price;
        }
    }

    pub async fn seed_order(&self, order: Order) -> Order {
        self.state.lock().await.orders.insert(order.id, order.clone());
        order
    }

    pub async fn balance(&self, user_id: Uuid) -> Option<BigDecimal> {
        self.state
            .lock()
            .await
            .wallets
            .get(&user_id)
            .map(|w| w.balance.clone())
    }

    pub async fn user(&self, user_id: Uuid) -> Option<User> {
        self.state.lock().await.users.get(&user_id).cloned()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        let mut txs: Vec<_> = self.state.lock().await.transactions.values().cloned().collect();
        txs.sort_by_key(|t| t.created_at);
        txs
    }

    pub async fn transaction(&self, id: Uuid) -> Option<Transaction> {
        self.state.lock().await.transactions.get(&id).cloned()
    }

    pub async fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.state.lock().await.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub async fn payment_request(&self, id: Uuid) -> Option<PaymentRequest> {
        self.state.lock().await.payment_requests.get(&id).cloned()
    }

    /// Makes the next `commit` fail, simulating a lost database write.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnit {
            guard,
            staged,
            fail_next_commit: self.fail_next_commit.clone(),
        }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

pub struct InMemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    fail_next_commit: Arc<AtomicBool>,
}

macro_rules! memory_repository {
    ($entity:ty, $table:ident) => {
        #[async_trait]
        impl Repository<$entity> for InMemoryUnit {
            async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<$entity>> {
                Ok(self.staged.$table.get(&id).cloned())
            }

            async fn insert(&mut self, entity: &$entity) -> RepositoryResult<$entity> {
                let id = Entity::id(entity);
                if self.staged.$table.contains_key(&id) {
                    return Err(RepositoryError::Conflict(format!(
                        "{} {} already exists",
                        <$entity as Entity>::NAME,
                        id
                    )));
                }
                self.staged.$table.insert(id, entity.clone());
                Ok(entity.clone())
            }
        }
    };
}

memory_repository!(User, users);
memory_repository!(BundlePlan, plans);
memory_repository!(Transaction, transactions);
memory_repository!(Order, orders);
memory_repository!(PaymentRequest, payment_requests);

fn missing(what: &str, id: Uuid) -> RepositoryError {
    RepositoryError::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl LedgerRepository for InMemoryUnit {
    async fn open_wallet(&mut self, user_id: Uuid) -> RepositoryResult<Wallet> {
        if self.staged.wallets.contains_key(&user_id) {
            return Err(RepositoryError::Conflict(format!("wallet for user {} already exists", user_id)));
        }
        let wallet = Wallet::new(user_id);
        self.staged.wallets.insert(user_id, wallet.clone());
        Ok(wallet)
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> RepositoryResult<Wallet> {
        self.staged
            .wallets
            .get(&user_id)
            .cloned()
            .ok_or_else(|| missing("wallet for user", user_id))
    }

    async fn adjust_balance(&mut self, user_id: Uuid, delta: &BigDecimal) -> RepositoryResult<Wallet> {
        let wallet = self
            .staged
            .wallets
            .get_mut(&user_id)
            .ok_or_else(|| missing("wallet for user", user_id))?;

        let next = &wallet.balance + delta;
        if next < BigDecimal::from(0) {
            return Err(RepositoryError::InsufficientFunds {
                balance: wallet.balance.clone(),
                required: -delta.clone(),
            });
        }
        wallet.balance = next.with_scale(2);
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn set_transaction_status(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<Transaction> {
        let tx = self
            .staged
            .transactions
            .get_mut(&id)
            .ok_or_else(|| missing("transaction", id))?;
        if !tx.status.can_transition_to(status) {
            return Err(RepositoryError::Conflict(format!(
                "transaction {} is {}, cannot become {}",
                id, tx.status, status
            )));
        }
        tx.status = status;
        Ok(tx.clone())
    }

    async fn set_transaction_reference(&mut self, id: Uuid, reference: &str) -> RepositoryResult<Transaction> {
        let tx = self
            .staged
            .transactions
            .get_mut(&id)
            .ok_or_else(|| missing("transaction", id))?;
        tx.reference = Some(reference.to_string());
        Ok(tx.clone())
    }
}

#[async_trait]
impl OrderRepository for InMemoryUnit {
    async fn finish_pending_order(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let order = self
            .staged
            .orders
            .get_mut(&id)
            .ok_or_else(|| missing("order", id))?;
        if order.status != OrderStatus::Pending {
            return Ok(false);
        }
        order.status = status;
        order.completed_at = Some(completed_at);
        Ok(true)
    }

    async fn orders_for_customer(&mut self, customer_id: Uuid) -> RepositoryResult<Vec<Order>> {
        let mut orders: Vec<_> = self
            .staged
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn pending_orders(&mut self, limit: i64) -> RepositoryResult<Vec<Order>> {
        let mut orders: Vec<_> = self
            .staged
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.external_id.is_some())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }
}

#[async_trait]
impl UserRepository for InMemoryUnit {
    async fn set_role(&mut self, id: Uuid, role: Role) -> RepositoryResult<User> {
        let user = self.staged.users.get_mut(&id).ok_or_else(|| missing("user", id))?;
        user.role = role;
        Ok(user.clone())
    }
}

#[async_trait]
impl PaymentRequestRepository for InMemoryUnit {
    async fn resolve_payment_request(
        &mut self,
        id: Uuid,
        status: PaymentRequestStatus,
    ) -> RepositoryResult<PaymentRequest> {
        let request = self
            .staged
            .payment_requests
            .get_mut(&id)
            .ok_or_else(|| missing("payment request", id))?;
        if request.status != PaymentRequestStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "payment request {} is already {}",
                id, request.status
            )));
        }
        request.status = status;
        request.resolved_at = Some(Utc::now());
        Ok(request.clone())
    }
}

#[async_trait]
impl WebhookLog for InMemoryUnit {
    async fn claim_reference(&mut self, reference: &str, charge_for: &str) -> RepositoryResult<bool> {
        if self.staged.webhook_events.contains_key(reference) {
            return Ok(false);
        }
        self.staged
            .webhook_events
            .insert(reference.to_string(), charge_for.to_string());
        Ok(true)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn commit(&mut self) -> RepositoryResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Storage("commit failed".to_string()));
        }
        *self.guard = self.staged.clone();
        Ok(())
    }
}
