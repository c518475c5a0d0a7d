//! Charge metadata threaded through the payment gateway.
//!
//! The gateway echoes the metadata object back in its webhook, which is how
//! a confirmed payment is tied to the purchase context captured when it was
//! initialized. Each payload carries a schema version `v`.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const METADATA_VERSION: u8 = 1;

fn current_version() -> u8 {
    METADATA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "charge_for")]
pub enum ChargeMetadata {
    #[serde(rename = "topup")]
    Topup {
        #[serde(default = "current_version")]
        v: u8,
        user_internal_id: Uuid,
    },
    #[serde(rename = "agent_reg", alias = "agent-reg")]
    AgentRegistration {
        #[serde(default = "current_version")]
        v: u8,
        user_internal_id: Uuid,
    },
    #[serde(rename = "buy-bundle")]
    BuyBundle(BundlePurchase),
    #[serde(other)]
    Unknown,
}

/// Purchase context captured when an agent-mediated purchase is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlePurchase {
    #[serde(default = "current_version")]
    pub v: u8,
    pub user_internal_id: Uuid,
    pub plan_id: Uuid,
    pub beneficiary_number: String,
    pub package_size: String,
    pub price: BigDecimal,
    pub agent_id: Uuid,
    pub transaction_id: Uuid,
}

impl ChargeMetadata {
    pub fn topup(user_id: Uuid) -> Self {
        ChargeMetadata::Topup {
            v: METADATA_VERSION,
            user_internal_id: user_id,
        }
    }

    pub fn agent_registration(user_id: Uuid) -> Self {
        ChargeMetadata::AgentRegistration {
            v: METADATA_VERSION,
            user_internal_id: user_id,
        }
    }

    /// The `charge_for` tag as it appears on the wire.
    pub fn charge_for(&self) -> &'static str {
        match self {
            ChargeMetadata::Topup { .. } => "topup",
            ChargeMetadata::AgentRegistration { .. } => "agent_reg",
            ChargeMetadata::BuyBundle(_) => "buy-bundle",
            ChargeMetadata::Unknown => "unknown",
        }
    }

    pub fn version(&self) -> Option<u8> {
        match self {
            ChargeMetadata::Topup { v, .. } | ChargeMetadata::AgentRegistration { v, .. } => Some(*v),
            ChargeMetadata::BuyBundle(purchase) => Some(purchase.v),
            ChargeMetadata::Unknown => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.version() == Some(METADATA_VERSION)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buy_bundle_metadata_is_tagged_and_versioned() {
        let purchase = BundlePurchase {
            v: METADATA_VERSION,
            user_internal_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            beneficiary_number: "0241234567".to_string(),
            package_size: "5GB".to_string(),
            price: "25.00".parse().unwrap(),
            agent_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
        };
        let value = ChargeMetadata::BuyBundle(purchase.clone()).to_value();

        assert_eq!(value["charge_for"], "buy-bundle");
        assert_eq!(value["v"], 1);
        assert_eq!(value["beneficiary_number"], "0241234567");

        let parsed: ChargeMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, ChargeMetadata::BuyBundle(purchase));
    }

    #[test]
    fn legacy_agent_reg_spelling_is_accepted() {
        let id = Uuid::new_v4();
        let parsed: ChargeMetadata =
            serde_json::from_value(json!({"charge_for": "agent-reg", "user_internal_id": id})).unwrap();
        assert_eq!(parsed, ChargeMetadata::agent_registration(id));
    }

    #[test]
    fn unknown_charge_for_parses_as_unknown() {
        let parsed: ChargeMetadata =
            serde_json::from_value(json!({"charge_for": "donation", "anything": 1})).unwrap();
        assert_eq!(parsed, ChargeMetadata::Unknown);
        assert!(!parsed.is_supported());
    }

    #[test]
    fn gateway_added_fields_are_ignored() {
        let id = Uuid::new_v4();
        let parsed: ChargeMetadata = serde_json::from_value(json!({
            "charge_for": "topup",
            "v": 1,
            "user_internal_id": id,
            "referrer": "https://shop.example/checkout"
        }))
        .unwrap();
        assert_eq!(parsed, ChargeMetadata::topup(id));
    }

    #[test]
    fn future_versions_are_not_supported() {
        let parsed: ChargeMetadata = serde_json::from_value(json!({
            "charge_for": "topup",
            "v": 2,
            "user_internal_id": Uuid::new_v4()
        }))
        .unwrap();
        assert!(!parsed.is_supported());
    }
}
