use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Regular,
    Agent,
}

text_enum!(Audience {
    Regular => "regular",
    Agent => "agent",
});

/// A sellable data bundle. `base_price` is fixed per row; orders snapshot it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlePlan {
    pub id: Uuid,
    pub network_id: Uuid,
    pub creator_id: Uuid,
    /// Package size understood by the provisioning API, e.g. "5GB".
    pub value: String,
    pub duration: String,
    pub base_price: BigDecimal,
    pub audience: Audience,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl BundlePlan {
    pub fn new(
        network_id: Uuid,
        creator_id: Uuid,
        value: impl Into<String>,
        duration: impl Into<String>,
        base_price: BigDecimal,
        audience: Audience,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            network_id,
            creator_id,
            value: value.into(),
            duration: duration.into(),
            base_price: super::money::normalize(&base_price),
            audience,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
