//! Purchase and payment orchestration.
//!
//! Two fulfilment paths coexist:
//! - `buy`: the customer's wallet pays. The wallet row stays locked while the
//!   provisioning call runs and is debited only after the upstream confirms
//!   delivery, in the same unit of work that inserts the order and its audit
//!   transaction.
//! - `initialize_agent_purchase`: the customer pays through the gateway and
//!   the agent who owns the plan fronts the provisioning cost. Only an
//!   `incomplete` purchase transaction exists until the webhook confirms the
//!   payment (see `services::webhook`).

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::money::{is_positive, normalize, to_minor_units};
use crate::domain::{
    BundlePurchase, ChargeMetadata, Order, OrderStatus, PaymentRequest, PaymentRequestStatus, Role,
    Transaction, TransactionStatus, TransactionType, User, METADATA_VERSION,
};
use crate::error::AppError;
use crate::policy::{authorize, Operation};
use crate::ports::{
    InitializeRequest, InitializedPayment, PaymentGateway, ProvisionRequest, Provisioner, Repository,
    Store,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PurchaseInput {
    pub plan_id: Uuid,
    pub beneficiary_number: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "payment_for", rename_all = "snake_case")]
pub enum PaymentPurpose {
    Topup { amount: BigDecimal },
    #[serde(alias = "agent-reg")]
    AgentReg,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WithdrawalInput {
    pub amount: BigDecimal,
    pub receiver_number: String,
    pub mobilemoney_name: String,
}

pub struct SettlementService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    provisioner: Arc<dyn Provisioner>,
    agent_registration_fee: BigDecimal,
}

fn validate_beneficiary(number: &str) -> Result<String, AppError> {
    let trimmed = number.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.len() < 9 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "beneficiary number {:?} is not a phone number",
            number
        )));
    }
    Ok(trimmed.to_string())
}

/// Client keys are scoped to the customer so two users can never share one.
fn provisioning_key(customer_id: Uuid, request_key: Option<&str>, order_id: Uuid) -> String {
    match request_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => format!("buy:{}:{}", customer_id, key),
        None => order_id.to_string(),
    }
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        provisioner: Arc<dyn Provisioner>,
        agent_registration_fee: BigDecimal,
    ) -> Self {
        Self {
            store,
            gateway,
            provisioner,
            agent_registration_fee: normalize(&agent_registration_fee),
        }
    }

    /// Wallet-funded purchase. Returns the created order.
    pub async fn buy(&self, customer: &User, input: PurchaseInput) -> Result<Order, AppError> {
        self.buy_with_key(customer, input, None).await
    }

    /// Like [`buy`](Self::buy), but a retried request carrying the same
    /// client idempotency key reaches the provisioning API with the same key.
    pub async fn buy_with_key(
        &self,
        customer: &User,
        input: PurchaseInput,
        request_key: Option<&str>,
    ) -> Result<Order, AppError> {
        let beneficiary = validate_beneficiary(&input.beneficiary_number)?;
        let mut uow = self.store.begin().await?;

        let wallet = uow.wallet_for_update(customer.id).await?;
        let plan = uow.get_plan(input.plan_id).await?;
        if !plan.is_active {
            return Err(AppError::NotFound(format!("plan {} is not available", plan.id)));
        }
        authorize(customer, Operation::BuyBundle { audience: plan.audience })?;

        let price = plan.base_price.clone();
        if !wallet.covers(&price) {
            return Err(AppError::InsufficientFunds {
                balance: wallet.balance,
                required: price,
            });
        }

        let mut order = Order::new(
            customer.id,
            None,
            plan.id,
            beneficiary.clone(),
            price.clone(),
            OrderStatus::Pending,
            None,
        );

        let provisioned = self
            .provisioner
            .create_order(&ProvisionRequest {
                beneficiary,
                package_size: plan.value.clone(),
                idempotency_key: provisioning_key(customer.id, request_key, order.id),
            })
            .await
            .map_err(|e| {
                tracing::warn!(
                    user_id = %customer.id,
                    plan_id = %plan.id,
                    error = %e,
                    "provisioning failed, wallet untouched"
                );
                AppError::from(e)
            })?;

        order.status = provisioned.status;
        order.external_id = Some(provisioned.external_id.clone());
        if provisioned.status.is_final() {
            order.completed_at = Some(chrono::Utc::now());
        }

        uow.adjust_balance(customer.id, &-price.clone()).await?;
        let order = uow.create_order(&order).await?;
        uow.record_transaction(&Transaction::complete(
            customer.id,
            price,
            TransactionType::Purchase,
            Some(provisioned.external_id.clone()),
        ))
        .await?;

        if let Err(e) = uow.commit().await {
            tracing::error!(
                order_id = %order.id,
                external_id = %provisioned.external_id,
                user_id = %customer.id,
                error = %e,
                "bundle provisioned upstream but the local commit failed; reconcile manually"
            );
            return Err(e.into());
        }

        tracing::info!(
            order_id = %order.id,
            external_id = %provisioned.external_id,
            user_id = %customer.id,
            price = %order.price_paid,
            "bundle purchased from wallet"
        );
        Ok(order)
    }

    /// Starts a gateway payment for a plan sold by an agent. The agent's float
    /// must cover the plan price before the gateway is contacted.
    pub async fn initialize_agent_purchase(
        &self,
        customer: &User,
        input: PurchaseInput,
    ) -> Result<InitializedPayment, AppError> {
        authorize(customer, Operation::InitializeAgentPurchase)?;
        let beneficiary = validate_beneficiary(&input.beneficiary_number)?;

        let mut uow = self.store.begin().await?;
        let plan = uow.get_plan(input.plan_id).await?;
        if !plan.is_active {
            return Err(AppError::NotFound(format!("plan {} is not available", plan.id)));
        }
        let agent = Repository::<User>::get(&mut *uow, plan.creator_id).await?;
        if agent.role != Role::Agent {
            return Err(AppError::BadRequest(format!(
                "plan {} is not sold through an agent",
                plan.id
            )));
        }

        let price = plan.base_price.clone();
        let agent_wallet = uow.wallet_for_update(agent.id).await?;
        if !agent_wallet.covers(&price) {
            tracing::info!(agent_id = %agent.id, plan_id = %plan.id, "agent float too low for purchase");
            return Err(AppError::InsufficientFunds {
                balance: agent_wallet.balance,
                required: price,
            });
        }
        let amount_minor = to_minor_units(&price)
            .ok_or_else(|| AppError::Internal(format!("plan {} price {} has no minor-unit form", plan.id, price)))?;

        let mut tx = Transaction::new(
            customer.id,
            price.clone(),
            TransactionType::Purchase,
            None,
            TransactionStatus::Incomplete,
        );
        let reference = tx.id.to_string();
        tx.reference = Some(reference.clone());
        uow.record_transaction(&tx).await?;
        uow.commit().await?;
        drop(uow);

        let metadata = ChargeMetadata::BuyBundle(BundlePurchase {
            v: METADATA_VERSION,
            user_internal_id: customer.id,
            plan_id: plan.id,
            beneficiary_number: beneficiary,
            package_size: plan.value.clone(),
            price,
            agent_id: agent.id,
            transaction_id: tx.id,
        });

        let result = self
            .gateway
            .initialize(&InitializeRequest {
                email: customer.email.clone(),
                amount_minor,
                reference,
                metadata,
            })
            .await;

        let mut uow = self.store.begin().await?;
        match result {
            Ok(payment) => {
                if tx.reference.as_deref() != Some(payment.reference.as_str()) {
                    uow.set_transaction_reference(tx.id, &payment.reference).await?;
                    uow.commit().await?;
                }
                tracing::info!(
                    transaction_id = %tx.id,
                    reference = %payment.reference,
                    agent_id = %agent.id,
                    "agent purchase initialized"
                );
                Ok(payment)
            }
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, kind = e.kind(), error = %e, "gateway initialize failed");
                uow.set_transaction_status(tx.id, TransactionStatus::Failed).await?;
                uow.commit().await?;
                Err(e.into())
            }
        }
    }

    /// Starts a gateway payment for a wallet top-up or the agent registration fee.
    pub async fn initialize_payment(
        &self,
        user: &User,
        purpose: PaymentPurpose,
    ) -> Result<InitializedPayment, AppError> {
        authorize(user, Operation::InitializePayment)?;

        let (amount, metadata) = match purpose {
            PaymentPurpose::Topup { amount } => {
                if !is_positive(&amount) {
                    return Err(AppError::Validation("top-up amount must be positive".to_string()));
                }
                (amount, ChargeMetadata::topup(user.id))
            }
            PaymentPurpose::AgentReg => {
                authorize(user, Operation::RegisterAsAgent)?;
                (
                    self.agent_registration_fee.clone(),
                    ChargeMetadata::agent_registration(user.id),
                )
            }
        };
        let amount_minor = to_minor_units(&amount)
            .ok_or_else(|| AppError::Validation(format!("amount {} has more than two decimals", amount)))?;

        let reference = Uuid::new_v4().to_string();
        let charge_for = metadata.charge_for();
        let payment = self
            .gateway
            .initialize(&InitializeRequest {
                email: user.email.clone(),
                amount_minor,
                reference,
                metadata,
            })
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %user.id, charge_for, kind = e.kind(), error = %e, "gateway initialize failed");
                AppError::from(e)
            })?;

        tracing::info!(user_id = %user.id, charge_for, reference = %payment.reference, "payment initialized");
        Ok(payment)
    }

    pub async fn orders_for(&self, customer: &User) -> Result<Vec<Order>, AppError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.orders_for_customer(customer.id).await?)
    }

    pub async fn request_withdrawal(
        &self,
        agent: &User,
        input: WithdrawalInput,
    ) -> Result<PaymentRequest, AppError> {
        authorize(agent, Operation::RequestWithdrawal)?;
        if !is_positive(&input.amount) || to_minor_units(&input.amount).is_none() {
            return Err(AppError::Validation(
                "withdrawal amount must be positive with at most two decimals".to_string(),
            ));
        }
        if input.mobilemoney_name.trim().is_empty() {
            return Err(AppError::Validation("mobilemoney_name is required".to_string()));
        }
        let receiver = validate_beneficiary(&input.receiver_number)?;

        let mut uow = self.store.begin().await?;
        let wallet = uow.wallet_for_update(agent.id).await?;
        if !wallet.covers(&input.amount) {
            return Err(AppError::InsufficientFunds {
                balance: wallet.balance,
                required: normalize(&input.amount),
            });
        }

        let request = PaymentRequest::new(agent.id, input.amount, receiver, input.mobilemoney_name.trim());
        let request = Repository::<PaymentRequest>::insert(&mut *uow, &request).await?;
        uow.commit().await?;

        tracing::info!(payment_request_id = %request.id, agent_id = %agent.id, amount = %request.amount, "withdrawal requested");
        Ok(request)
    }

    /// Approving debits the agent's wallet and records the withdrawal in the
    /// same unit of work; rejecting only closes the request.
    pub async fn resolve_withdrawal(
        &self,
        admin: &User,
        request_id: Uuid,
        approve: bool,
    ) -> Result<PaymentRequest, AppError> {
        authorize(admin, Operation::ResolveWithdrawal)?;

        let mut uow = self.store.begin().await?;
        let status = if approve {
            PaymentRequestStatus::Approved
        } else {
            PaymentRequestStatus::Rejected
        };
        let request = uow.resolve_payment_request(request_id, status).await?;

        if approve {
            uow.adjust_balance(request.agent_id, &-request.amount.clone()).await?;
            uow.record_transaction(&Transaction::complete(
                request.agent_id,
                request.amount.clone(),
                TransactionType::Withdrawal,
                Some(format!("withdrawal-{}", request.id)),
            ))
            .await?;
        }
        uow.commit().await?;

        tracing::info!(payment_request_id = %request.id, status = %request.status, admin_id = %admin.id, "withdrawal resolved");
        Ok(request)
    }
}
