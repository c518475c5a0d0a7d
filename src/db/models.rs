//! Row types for SQLx. Enumerations are stored as TEXT and parsed on the way
//! out, so an unexpected value surfaces as a storage error instead of being
//! guessed at.

use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{BundlePlan, Order, PaymentRequest, Transaction, User, Wallet};
use crate::ports::{RepositoryError, RepositoryResult};

fn parse<T>(column: &str, raw: &str) -> RepositoryResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse()
        .map_err(|e: String| RepositoryError::Storage(format!("column {}: {}", column, e)))
}

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_domain(self) -> RepositoryResult<User> {
        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            role: parse("users.role", &self.role)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct WalletRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

impl WalletRow {
    pub fn into_domain(self) -> Wallet {
        Wallet {
            id: self.id,
            user_id: self.user_id,
            balance: self.balance,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub network_id: Uuid,
    pub creator_id: Uuid,
    pub value: String,
    pub duration: String,
    pub base_price: BigDecimal,
    pub audience: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PlanRow {
    pub fn into_domain(self) -> RepositoryResult<BundlePlan> {
        Ok(BundlePlan {
            id: self.id,
            network_id: self.network_id,
            creator_id: self.creator_id,
            value: self.value,
            duration: self.duration,
            base_price: self.base_price,
            audience: parse("bundle_plans.audience", &self.audience)?,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub transaction_type: String,
    pub reference: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TransactionRow {
    pub fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            transaction_type: parse("transactions.transaction_type", &self.transaction_type)?,
            reference: self.reference,
            status: parse("transactions.status", &self.status)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub beneficiary_number: String,
    pub price_paid: BigDecimal,
    pub status: String,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    pub fn into_domain(self) -> RepositoryResult<Order> {
        Ok(Order {
            id: self.id,
            customer_id: self.customer_id,
            agent_id: self.agent_id,
            plan_id: self.plan_id,
            beneficiary_number: self.beneficiary_number,
            price_paid: self.price_paid,
            status: parse("orders.status", &self.status)?,
            external_id: self.external_id,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PaymentRequestRow {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub amount: BigDecimal,
    pub receiver_number: String,
    pub mobilemoney_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentRequestRow {
    pub fn into_domain(self) -> RepositoryResult<PaymentRequest> {
        Ok(PaymentRequest {
            id: self.id,
            agent_id: self.agent_id,
            amount: self.amount,
            receiver_number: self.receiver_number,
            mobilemoney_name: self.mobilemoney_name,
            status: parse("payment_requests.status", &self.status)?,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}
