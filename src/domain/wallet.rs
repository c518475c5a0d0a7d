use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One wallet per user, created at signup with a zero balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: BigDecimal::from(0),
            updated_at: Utc::now(),
        }
    }

    pub fn covers(&self, amount: &BigDecimal) -> bool {
        &self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_is_inclusive_at_equality() {
        let mut wallet = Wallet::new(Uuid::new_v4());
        wallet.balance = "50.00".parse().unwrap();

        assert!(wallet.covers(&"50".parse().unwrap()));
        assert!(wallet.covers(&"49.99".parse().unwrap()));
        assert!(!wallet.covers(&"50.01".parse().unwrap()));
    }
}
