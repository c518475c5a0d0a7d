use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Delivered,
    Failed,
}

text_enum!(OrderStatus {
    Pending => "pending",
    Delivered => "delivered",
    Failed => "failed",
});

impl OrderStatus {
    /// Maps a provisioning API status string onto the local enumeration.
    /// Anything not recognisably final stays pending.
    pub fn from_upstream(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delivered" | "completed" | "successful" | "success" => OrderStatus::Delivered,
            "failed" | "cancelled" | "canceled" | "rejected" => OrderStatus::Failed,
            _ => OrderStatus::Pending,
        }
    }

    pub fn is_final(self) -> bool {
        self != OrderStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub beneficiary_number: String,
    /// Snapshot of the plan price at purchase time.
    pub price_paid: BigDecimal,
    pub status: OrderStatus,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        customer_id: Uuid,
        agent_id: Option<Uuid>,
        plan_id: Uuid,
        beneficiary_number: impl Into<String>,
        price_paid: BigDecimal,
        status: OrderStatus,
        external_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            agent_id,
            plan_id,
            beneficiary_number: beneficiary_number.into(),
            price_paid: super::money::normalize(&price_paid),
            status,
            external_id,
            created_at: now,
            completed_at: status.is_final().then_some(now),
        }
    }
}
