//! Postgres implementation of the store ports.
//!
//! Each unit of work is one database transaction. Wallet reads inside a
//! unit take a row lock (`FOR UPDATE`) and balance changes are conditional
//! updates, so two purchases against the same wallet cannot both spend the
//! same money.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::db::models::{OrderRow, PaymentRequestRow, PlanRow, TransactionRow, UserRow, WalletRow};
use crate::domain::{
    BundlePlan, Order, OrderStatus, PaymentRequest, PaymentRequestStatus, Role, Transaction,
    TransactionStatus, User, Wallet,
};
use crate::ports::{
    LedgerRepository, OrderRepository, PaymentRequestRepository, Repository, RepositoryError,
    RepositoryResult, Store, UnitOfWork, UserRepository, WebhookLog,
};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgUnitOfWork {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> RepositoryResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| RepositoryError::Storage("unit of work already committed".to_string()))
    }
}

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, transaction_type, reference, status, created_at";
const ORDER_COLUMNS: &str = "id, customer_id, agent_id, plan_id, beneficiary_number, price_paid, \
                             status, external_id, created_at, completed_at";

#[async_trait]
impl Repository<User> for PgUnitOfWork {
    async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, phone, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(UserRow::into_domain).transpose()
    }

    async fn insert(&mut self, user: &User) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, name, email, phone, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, email, phone, role, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .fetch_one(self.conn()?)
        .await?;
        row.into_domain()
    }
}

#[async_trait]
impl Repository<BundlePlan> for PgUnitOfWork {
    async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<BundlePlan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT id, network_id, creator_id, value, duration, base_price, audience, is_active, created_at
            FROM bundle_plans WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(PlanRow::into_domain).transpose()
    }

    async fn insert(&mut self, plan: &BundlePlan) -> RepositoryResult<BundlePlan> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            INSERT INTO bundle_plans (
                id, network_id, creator_id, value, duration, base_price, audience, is_active, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, network_id, creator_id, value, duration, base_price, audience, is_active, created_at
            "#,
        )
        .bind(plan.id)
        .bind(plan.network_id)
        .bind(plan.creator_id)
        .bind(&plan.value)
        .bind(&plan.duration)
        .bind(&plan.base_price)
        .bind(plan.audience.as_str())
        .bind(plan.is_active)
        .bind(plan.created_at)
        .fetch_one(self.conn()?)
        .await?;
        row.into_domain()
    }
}

#[async_trait]
impl Repository<Transaction> for PgUnitOfWork {
    async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn insert(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let sql = format!(
            r#"
            INSERT INTO transactions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {cols}
            "#,
            cols = TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(tx.user_id)
            .bind(&tx.amount)
            .bind(tx.transaction_type.as_str())
            .bind(&tx.reference)
            .bind(tx.status.as_str())
            .bind(tx.created_at)
            .fetch_one(self.conn()?)
            .await?;
        row.into_domain()
    }
}

#[async_trait]
impl Repository<Order> for PgUnitOfWork {
    async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn insert(&mut self, order: &Order) -> RepositoryResult<Order> {
        let sql = format!(
            r#"
            INSERT INTO orders ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {cols}
            "#,
            cols = ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order.id)
            .bind(order.customer_id)
            .bind(order.agent_id)
            .bind(order.plan_id)
            .bind(&order.beneficiary_number)
            .bind(&order.price_paid)
            .bind(order.status.as_str())
            .bind(&order.external_id)
            .bind(order.created_at)
            .bind(order.completed_at)
            .fetch_one(self.conn()?)
            .await?;
        row.into_domain()
    }
}

#[async_trait]
impl Repository<PaymentRequest> for PgUnitOfWork {
    async fn find(&mut self, id: Uuid) -> RepositoryResult<Option<PaymentRequest>> {
        let row = sqlx::query_as::<_, PaymentRequestRow>(
            r#"
            SELECT id, agent_id, amount, receiver_number, mobilemoney_name, status, created_at, resolved_at
            FROM payment_requests WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(PaymentRequestRow::into_domain).transpose()
    }

    async fn insert(&mut self, request: &PaymentRequest) -> RepositoryResult<PaymentRequest> {
        let row = sqlx::query_as::<_, PaymentRequestRow>(
            r#"
            INSERT INTO payment_requests (
                id, agent_id, amount, receiver_number, mobilemoney_name, status, created_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, agent_id, amount, receiver_number, mobilemoney_name, status, created_at, resolved_at
            "#,
        )
        .bind(request.id)
        .bind(request.agent_id)
        .bind(&request.amount)
        .bind(&request.receiver_number)
        .bind(&request.mobilemoney_name)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.resolved_at)
        .fetch_one(self.conn()?)
        .await?;
        row.into_domain()
    }
}

#[async_trait]
impl LedgerRepository for PgUnitOfWork {
    async fn open_wallet(&mut self, user_id: Uuid) -> RepositoryResult<Wallet> {
        let wallet = Wallet::new(user_id);
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            INSERT INTO wallets (id, user_id, balance, updated_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, balance, updated_at
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(&wallet.balance)
        .bind(wallet.updated_at)
        .fetch_one(self.conn()?)
        .await?;
        Ok(row.into_domain())
    }

    async fn wallet_for_update(&mut self, user_id: Uuid) -> RepositoryResult<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(WalletRow::into_domain)
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet for user {}", user_id)))
    }

    async fn adjust_balance(&mut self, user_id: Uuid, delta: &BigDecimal) -> RepositoryResult<Wallet> {
        let updated = sqlx::query_as::<_, WalletRow>(
            r#"
            UPDATE wallets
            SET balance = balance + $2, updated_at = NOW()
            WHERE user_id = $1 AND balance + $2 >= 0
            RETURNING id, user_id, balance, updated_at
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(self.conn()?)
        .await?;

        if let Some(row) = updated {
            return Ok(row.into_domain());
        }

        let current: Option<BigDecimal> = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(self.conn()?)
            .await?;
        match current {
            Some(balance) => Err(RepositoryError::InsufficientFunds {
                balance,
                required: -delta.clone(),
            }),
            None => Err(RepositoryError::NotFound(format!("wallet for user {}", user_id))),
        }
    }

    async fn set_transaction_status(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<Transaction> {
        if status == TransactionStatus::Incomplete {
            return Err(RepositoryError::Conflict(format!(
                "transaction {} cannot move back to incomplete",
                id
            )));
        }

        let sql = format!(
            "UPDATE transactions SET status = $2 WHERE id = $1 AND status = 'incomplete' RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let updated = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(self.conn()?)
            .await?;

        match updated {
            Some(row) => row.into_domain(),
            None => match Repository::<Transaction>::find(self, id).await? {
                Some(existing) => Err(RepositoryError::Conflict(format!(
                    "transaction {} is {}, cannot become {}",
                    id, existing.status, status
                ))),
                None => Err(RepositoryError::NotFound(format!("transaction {}", id))),
            },
        }
    }

    async fn set_transaction_reference(&mut self, id: Uuid, reference: &str) -> RepositoryResult<Transaction> {
        let sql = format!(
            "UPDATE transactions SET reference = $2 WHERE id = $1 RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(reference)
            .fetch_optional(self.conn()?)
            .await?;
        row.ok_or_else(|| RepositoryError::NotFound(format!("transaction {}", id)))?
            .into_domain()
    }
}

#[async_trait]
impl OrderRepository for PgUnitOfWork {
    async fn finish_pending_order(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, completed_at = $3 WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(completed_at)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn orders_for_customer(&mut self, customer_id: Uuid) -> RepositoryResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(customer_id)
            .fetch_all(self.conn()?)
            .await?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    async fn pending_orders(&mut self, limit: i64) -> RepositoryResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {} FROM orders
            WHERE status = 'pending' AND external_id IS NOT NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(limit)
            .fetch_all(self.conn()?)
            .await?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }
}

#[async_trait]
impl UserRepository for PgUnitOfWork {
    async fn set_role(&mut self, id: Uuid, role: Role) -> RepositoryResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING id, name, email, phone, role, created_at",
        )
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(self.conn()?)
        .await?;
        row.ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))?
            .into_domain()
    }
}

#[async_trait]
impl PaymentRequestRepository for PgUnitOfWork {
    async fn resolve_payment_request(
        &mut self,
        id: Uuid,
        status: PaymentRequestStatus,
    ) -> RepositoryResult<PaymentRequest> {
        let updated = sqlx::query_as::<_, PaymentRequestRow>(
            r#"
            UPDATE payment_requests
            SET status = $2, resolved_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING id, agent_id, amount, receiver_number, mobilemoney_name, status, created_at, resolved_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(self.conn()?)
        .await?;

        match updated {
            Some(row) => row.into_domain(),
            None => match Repository::<PaymentRequest>::find(self, id).await? {
                Some(existing) => Err(RepositoryError::Conflict(format!(
                    "payment request {} is already {}",
                    id, existing.status
                ))),
                None => Err(RepositoryError::NotFound(format!("payment request {}", id))),
            },
        }
    }
}

#[async_trait]
impl WebhookLog for PgUnitOfWork {
    async fn claim_reference(&mut self, reference: &str, charge_for: &str) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (reference, charge_for) VALUES ($1, $2) ON CONFLICT (reference) DO NOTHING",
        )
        .bind(reference)
        .bind(charge_for)
        .execute(self.conn()?)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(&mut self) -> RepositoryResult<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(RepositoryError::Storage("unit of work already committed".to_string())),
        }
    }
}
