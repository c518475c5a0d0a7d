//! Payment gateway webhook verification and dispatch.
//!
//! Only `charge.success` events act on state. Each actionable event claims
//! its gateway `reference` in the same unit of work as the mutation it
//! causes, so a redelivered event finds the claim and changes nothing.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::money::{from_minor_units, normalize};
use crate::domain::{
    BundlePurchase, ChargeMetadata, Order, Role, Transaction, TransactionStatus, TransactionType,
    User,
};
use crate::error::AppError;
use crate::paystack::verify_signature;
use crate::ports::{ProvisionRequest, Provisioner, Repository, Store, UnitOfWork};

pub const CHARGE_SUCCESS: &str = "charge.success";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing webhook signature")]
    MissingSignature,

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                AppError::Unauthorized(err.to_string())
            }
            WebhookError::Malformed(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

/// What happened to an accepted event. Every variant is answered with 2xx.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied(String),
    /// Payment kept, purchase reversed into the customer's wallet.
    Refunded(String),
    Duplicate,
    Ignored(String),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    amount: i64,
    reference: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub struct WebhookService {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn Provisioner>,
    secret_key: String,
    agent_registration_fee: BigDecimal,
}

impl WebhookService {
    pub fn new(
        store: Arc<dyn Store>,
        provisioner: Arc<dyn Provisioner>,
        secret_key: impl Into<String>,
        agent_registration_fee: BigDecimal,
    ) -> Self {
        Self {
            store,
            provisioner,
            secret_key: secret_key.into(),
            agent_registration_fee: normalize(&agent_registration_fee),
        }
    }

    /// Verifies and applies one gateway event. Errors are returned only for
    /// unauthenticated or unparseable input; processing failures are logged
    /// and reported as [`WebhookOutcome::Failed`].
    pub async fn handle_event(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        if !verify_signature(&self.secret_key, raw_body, signature) {
            tracing::warn!("webhook rejected: signature mismatch");
            return Err(WebhookError::InvalidSignature);
        }

        let event: GatewayEvent =
            serde_json::from_slice(raw_body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        if event.event != CHARGE_SUCCESS {
            tracing::debug!(event = %event.event, "webhook event ignored");
            return Ok(WebhookOutcome::Ignored(format!("event {}", event.event)));
        }

        let charge: ChargeData = serde_json::from_value(event.data)
            .map_err(|e| WebhookError::Malformed(format!("charge data: {}", e)))?;

        let metadata = match serde_json::from_value::<ChargeMetadata>(charge.metadata.clone()) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(reference = %charge.reference, error = %e, "charge metadata unreadable, ignoring");
                return Ok(WebhookOutcome::Ignored("unreadable metadata".to_string()));
            }
        };
        if !metadata.is_supported() {
            tracing::warn!(
                reference = %charge.reference,
                charge_for = metadata.charge_for(),
                version = ?metadata.version(),
                "unsupported charge metadata, ignoring"
            );
            return Ok(WebhookOutcome::Ignored(format!("charge_for {}", metadata.charge_for())));
        }

        let charge_for = metadata.charge_for();
        let result = match metadata {
            ChargeMetadata::Topup {
                user_internal_id, ..
            } => self.apply_topup(&charge, user_internal_id).await,
            ChargeMetadata::AgentRegistration {
                user_internal_id, ..
            } => self.apply_agent_registration(&charge, user_internal_id).await,
            ChargeMetadata::BuyBundle(purchase) => self.apply_bundle_purchase(&charge, purchase).await,
            ChargeMetadata::Unknown => Ok(WebhookOutcome::Ignored("unknown charge_for".to_string())),
        };

        Ok(result.unwrap_or_else(|e| {
            tracing::error!(reference = %charge.reference, charge_for, error = %e, "webhook processing failed");
            WebhookOutcome::Failed(e.to_string())
        }))
    }

    async fn apply_topup(&self, charge: &ChargeData, user_id: Uuid) -> Result<WebhookOutcome, AppError> {
        let amount = from_minor_units(charge.amount);
        if amount <= BigDecimal::from(0) {
            return Ok(WebhookOutcome::Ignored("non-positive amount".to_string()));
        }

        let mut uow = self.store.begin().await?;
        if !uow.claim_reference(&charge.reference, "topup").await? {
            tracing::info!(reference = %charge.reference, "duplicate topup event");
            return Ok(WebhookOutcome::Duplicate);
        }

        uow.wallet_for_update(user_id).await?;
        uow.record_transaction(&Transaction::complete(
            user_id,
            amount.clone(),
            TransactionType::Topup,
            Some(charge.reference.clone()),
        ))
        .await?;
        let wallet = uow.adjust_balance(user_id, &amount).await?;
        uow.commit().await?;

        tracing::info!(reference = %charge.reference, user_id = %user_id, amount = %amount, balance = %wallet.balance, "wallet topped up");
        Ok(WebhookOutcome::Applied("topup".to_string()))
    }

    async fn apply_agent_registration(
        &self,
        charge: &ChargeData,
        user_id: Uuid,
    ) -> Result<WebhookOutcome, AppError> {
        let paid = from_minor_units(charge.amount);

        let mut uow = self.store.begin().await?;
        if !uow.claim_reference(&charge.reference, "agent_reg").await? {
            tracing::info!(reference = %charge.reference, "duplicate agent registration event");
            return Ok(WebhookOutcome::Duplicate);
        }

        let user = Repository::<User>::get(&mut *uow, user_id).await?;
        if paid < self.agent_registration_fee {
            let reason = format!("paid {} is below the registration fee {}", paid, self.agent_registration_fee);
            refund(&mut *uow, user_id, &paid, &charge.reference).await?;
            uow.commit().await?;
            tracing::warn!(reference = %charge.reference, user_id = %user_id, %reason, "agent registration refunded");
            return Ok(WebhookOutcome::Refunded(reason));
        }

        uow.record_transaction(&Transaction::complete(
            user_id,
            paid,
            TransactionType::Purchase,
            Some(charge.reference.clone()),
        ))
        .await?;
        if user.role == Role::Regular {
            uow.set_role(user_id, Role::Agent).await?;
        } else {
            tracing::warn!(user_id = %user_id, role = %user.role, "registration fee paid by non-regular user; role unchanged");
        }
        uow.commit().await?;

        tracing::info!(reference = %charge.reference, user_id = %user_id, "user registered as agent");
        Ok(WebhookOutcome::Applied("agent_reg".to_string()))
    }

    /// Provisions a gateway-paid purchase against the owning agent's float.
    /// Any failure marks the purchase transaction failed and credits the
    /// customer's wallet with what they paid.
    async fn apply_bundle_purchase(
        &self,
        charge: &ChargeData,
        purchase: BundlePurchase,
    ) -> Result<WebhookOutcome, AppError> {
        let paid = from_minor_units(charge.amount);

        let mut uow = self.store.begin().await?;
        if !uow.claim_reference(&charge.reference, "buy-bundle").await? {
            tracing::info!(reference = %charge.reference, "duplicate buy-bundle event");
            return Ok(WebhookOutcome::Duplicate);
        }

        let tx = Repository::<Transaction>::get(&mut *uow, purchase.transaction_id).await?;
        match tx.status {
            TransactionStatus::Incomplete => {}
            TransactionStatus::Complete => {
                uow.commit().await?;
                tracing::warn!(transaction_id = %tx.id, "purchase already fulfilled");
                return Ok(WebhookOutcome::Ignored(format!("transaction {} is {}", tx.id, tx.status)));
            }
            // Money arrived for a purchase that was abandoned, e.g. after a
            // lost gateway response. Nothing will be provisioned for it.
            TransactionStatus::Failed => {
                let reason = format!("transaction {} was already failed", tx.id);
                refund(&mut *uow, tx.user_id, &paid, &charge.reference).await?;
                uow.commit().await?;
                tracing::warn!(
                    reference = %charge.reference,
                    transaction_id = %tx.id,
                    user_id = %tx.user_id,
                    amount = %paid,
                    "payment for failed purchase refunded to wallet"
                );
                return Ok(WebhookOutcome::Refunded(reason));
            }
        }
        let customer_id = tx.user_id;

        let rejection = if tx.user_id != purchase.user_internal_id {
            Some("metadata customer does not own the transaction".to_string())
        } else if paid != tx.amount || normalize(&purchase.price) != tx.amount {
            Some(format!("paid {} does not match captured price {}", paid, tx.amount))
        } else {
            let float = uow.wallet_for_update(purchase.agent_id).await?;
            if float.covers(&tx.amount) {
                None
            } else {
                Some(format!("agent float {} below price {}", float.balance, tx.amount))
            }
        };
        if let Some(reason) = rejection {
            return self.compensate(uow, &tx, customer_id, &paid, &charge.reference, reason).await;
        }

        let provisioned = self
            .provisioner
            .create_order(&ProvisionRequest {
                beneficiary: purchase.beneficiary_number.clone(),
                package_size: purchase.package_size.clone(),
                idempotency_key: tx.id.to_string(),
            })
            .await;
        let provisioned = match provisioned {
            Ok(provisioned) => provisioned,
            Err(e) => {
                let reason = format!("provisioning failed: {}", e);
                return self.compensate(uow, &tx, customer_id, &paid, &charge.reference, reason).await;
            }
        };

        let price = tx.amount.clone();
        uow.set_transaction_status(tx.id, TransactionStatus::Complete).await?;
        let order = uow
            .create_order(&Order::new(
                customer_id,
                Some(purchase.agent_id),
                purchase.plan_id,
                purchase.beneficiary_number,
                price.clone(),
                provisioned.status,
                Some(provisioned.external_id.clone()),
            ))
            .await?;
        uow.adjust_balance(purchase.agent_id, &-price.clone()).await?;
        uow.record_transaction(&Transaction::complete(
            purchase.agent_id,
            price,
            TransactionType::Commission,
            Some(charge.reference.clone()),
        ))
        .await?;

        if let Err(e) = uow.commit().await {
            tracing::error!(
                reference = %charge.reference,
                transaction_id = %tx.id,
                external_id = %provisioned.external_id,
                error = %e,
                "bundle provisioned upstream but the local commit failed; reconcile manually"
            );
            return Err(e.into());
        }

        tracing::info!(
            reference = %charge.reference,
            order_id = %order.id,
            external_id = %provisioned.external_id,
            agent_id = %purchase.agent_id,
            "agent purchase fulfilled"
        );
        Ok(WebhookOutcome::Applied("buy-bundle".to_string()))
    }

    async fn compensate(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        tx: &Transaction,
        customer_id: Uuid,
        paid: &BigDecimal,
        reference: &str,
        reason: String,
    ) -> Result<WebhookOutcome, AppError> {
        uow.set_transaction_status(tx.id, TransactionStatus::Failed).await?;
        refund(&mut *uow, customer_id, paid, reference).await?;
        uow.commit().await?;

        tracing::warn!(
            reference,
            transaction_id = %tx.id,
            user_id = %customer_id,
            amount = %paid,
            %reason,
            "purchase failed, payment refunded to wallet"
        );
        Ok(WebhookOutcome::Refunded(reason))
    }
}

async fn refund(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    amount: &BigDecimal,
    reference: &str,
) -> Result<(), AppError> {
    if *amount <= BigDecimal::from(0) {
        return Ok(());
    }
    uow.record_transaction(&Transaction::complete(
        user_id,
        amount.clone(),
        TransactionType::Refund,
        Some(reference.to_string()),
    ))
    .await?;
    uow.adjust_balance(user_id, amount).await?;
    Ok(())
}
