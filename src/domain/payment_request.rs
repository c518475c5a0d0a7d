use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRequestStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(PaymentRequestStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Agent-initiated withdrawal to a mobile money account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub amount: BigDecimal,
    pub receiver_number: String,
    pub mobilemoney_name: String,
    pub status: PaymentRequestStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentRequest {
    pub fn new(
        agent_id: Uuid,
        amount: BigDecimal,
        receiver_number: impl Into<String>,
        mobilemoney_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            amount: super::money::normalize(&amount),
            receiver_number: receiver_number.into(),
            mobilemoney_name: mobilemoney_name.into(),
            status: PaymentRequestStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
