//! Transaction domain entity.
//! Append-only audit row for every money-moving event.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Topup,
    Purchase,
    Commission,
    Withdrawal,
    Refund,
}

text_enum!(TransactionType {
    Topup => "topup",
    Purchase => "purchase",
    Commission => "commission",
    Withdrawal => "withdrawal",
    Refund => "refund",
});

/// Status moves out of `Incomplete` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Incomplete,
    Complete,
    Failed,
}

text_enum!(TransactionStatus {
    Incomplete => "incomplete",
    Complete => "complete",
    Failed => "failed",
});

impl TransactionStatus {
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self == TransactionStatus::Incomplete && next != TransactionStatus::Incomplete
    }
}

/// Domain entity representing a ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub transaction_type: TransactionType,
    pub reference: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: Uuid,
        amount: BigDecimal,
        transaction_type: TransactionType,
        reference: Option<String>,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount: super::money::normalize(&amount),
            transaction_type,
            reference,
            status,
            created_at: Utc::now(),
        }
    }

    /// A settled row, written in the same unit of work as the balance change it documents.
    pub fn complete(
        user_id: Uuid,
        amount: BigDecimal,
        transaction_type: TransactionType,
        reference: Option<String>,
    ) -> Self {
        Self::new(user_id, amount, transaction_type, reference, TransactionStatus::Complete)
    }
}
