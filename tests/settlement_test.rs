mod common;

use bundle_core::domain::{Audience, OrderStatus, Role, TransactionStatus, TransactionType};
use bundle_core::error::AppError;
use bundle_core::ports::ProvisionedOrder;
use bundle_core::provisioning::ProvisioningError;
use bundle_core::services::{PaymentPurpose, PurchaseInput};
use common::{dec, Harness};
use futures::future::join_all;
use std::time::Duration;
use uuid::Uuid;

fn purchase(plan_id: Uuid) -> PurchaseInput {
    PurchaseInput {
        plan_id,
        beneficiary_number: "0241234567".to_string(),
    }
}

#[tokio::test]
async fn buy_with_exact_balance_empties_wallet() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "50.00").await;
    let plan = h.plan(&admin, "50.00", Audience::Regular).await;

    let order = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap();

    assert_eq!(h.balance(&customer).await, dec("0.00"));
    assert_eq!(order.price_paid, dec("50.00"));
    assert_eq!(order.customer_id, customer.id);
    assert_eq!(order.external_id.as_deref(), Some("EXT-1"));
    assert_eq!(h.store.orders().await.len(), 1);

    let txs = h.store.transactions().await;
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].transaction_type, TransactionType::Purchase);
    assert_eq!(txs[0].status, TransactionStatus::Complete);
    assert_eq!(txs[0].amount, dec("50.00"));
}

#[tokio::test]
async fn buy_provisions_with_plan_package_and_order_key() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "80.00").await;
    let plan = h.plan(&admin, "20.00", Audience::Regular).await;

    let order = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap();

    let sent = h.provisioner.created.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].package_size, "5GB");
    assert_eq!(sent[0].beneficiary, "0241234567");
    assert_eq!(sent[0].idempotency_key, order.id.to_string());
}

#[tokio::test]
async fn retried_buy_reuses_the_client_key_upstream() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "80.00").await;
    let plan = h.plan(&admin, "20.00", Audience::Regular).await;
    h.provisioner
        .fail_next(ProvisioningError::Connection("timed out".into()));

    h.state
        .settlement
        .buy_with_key(&customer, purchase(plan.id), Some("checkout-7"))
        .await
        .unwrap_err();
    let order = h
        .state
        .settlement
        .buy_with_key(&customer, purchase(plan.id), Some("checkout-7"))
        .await
        .unwrap();

    let sent = h.provisioner.created.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].idempotency_key, sent[1].idempotency_key);
    assert_ne!(sent[1].idempotency_key, order.id.to_string());
    assert_eq!(h.balance(&customer).await, dec("60.00"));
}

#[tokio::test]
async fn buy_with_insufficient_balance_changes_nothing() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "10.00").await;
    let plan = h.plan(&admin, "50.00", Audience::Regular).await;

    let err = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap_err();

    assert!(matches!(err, AppError::InsufficientFunds { .. }));
    assert_eq!(err.status_code().as_u16(), 402);
    assert_eq!(h.balance(&customer).await, dec("10.00"));
    assert!(h.store.orders().await.is_empty());
    assert!(h.store.transactions().await.is_empty());
    assert_eq!(h.provisioner.calls(), 0);
}

#[tokio::test]
async fn upstream_unavailable_surfaces_as_503_without_mutation() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&admin, "50.00", Audience::Regular).await;
    h.provisioner
        .fail_next(ProvisioningError::Unavailable("insufficient vendor balance".into()));

    let err = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap_err();

    assert_eq!(err.status_code().as_u16(), 503);
    assert_eq!(h.balance(&customer).await, dec("100.00"));
    assert!(h.store.orders().await.is_empty());
    assert!(h.store.transactions().await.is_empty());
}

#[tokio::test]
async fn other_provisioning_failures_surface_as_500_without_mutation() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&admin, "50.00", Audience::Regular).await;
    h.provisioner.fail_next(ProvisioningError::Http {
        status: 500,
        body: "boom".into(),
    });

    let err = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap_err();

    assert_eq!(err.status_code().as_u16(), 500);
    assert_eq!(h.balance(&customer).await, dec("100.00"));
    assert!(h.store.orders().await.is_empty());
}

#[tokio::test]
async fn delivered_on_creation_stamps_completion() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "30.00").await;
    let plan = h.plan(&admin, "10.00", Audience::Regular).await;
    h.provisioner.push_result(Ok(ProvisionedOrder {
        external_id: "778".into(),
        status: OrderStatus::Delivered,
    }));

    let order = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap();

    assert_eq!(order.status, OrderStatus::Delivered);
    assert!(order.completed_at.is_some());
}

#[tokio::test]
async fn price_paid_is_a_snapshot() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&admin, "25.00", Audience::Regular).await;

    let order = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap();
    h.store.set_plan_price(plan.id, dec("40.00")).await;

    let orders = h.state.settlement.orders_for(&customer).await.unwrap();
    assert_eq!(orders[0].id, order.id);
    assert_eq!(orders[0].price_paid, dec("25.00"));
}

#[tokio::test]
async fn concurrent_buys_never_overspend() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&admin, "30.00", Audience::Regular).await;
    h.provisioner.set_delay(Duration::from_millis(5));

    let attempts = (0..6).map(|_| h.state.settlement.buy(&customer, purchase(plan.id)));
    let results = join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::InsufficientFunds { .. })));
    assert_eq!(h.balance(&customer).await, dec("10.00"));
    assert_eq!(h.store.orders().await.len(), 3);
    assert_eq!(h.provisioner.calls(), 3);
}

#[tokio::test]
async fn commit_failure_after_provisioning_reports_error() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "50.00").await;
    let plan = h.plan(&admin, "20.00", Audience::Regular).await;
    h.store.fail_next_commit();

    let err = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap_err();

    assert_eq!(err.status_code().as_u16(), 500);
    assert_eq!(h.provisioner.calls(), 1);
    assert_eq!(h.balance(&customer).await, dec("50.00"));
    assert!(h.store.orders().await.is_empty());
}

#[tokio::test]
async fn agent_audience_plans_need_the_agent_role() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "100.00").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&agent, "20.00", Audience::Agent).await;

    let err = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
    assert_eq!(h.provisioner.calls(), 0);

    h.state.settlement.buy(&agent, purchase(plan.id)).await.unwrap();
    assert_eq!(h.balance(&agent).await, dec("80.00"));
}

#[tokio::test]
async fn unknown_plan_is_not_found() {
    let h = Harness::new();
    let customer = h.user(Role::Regular, "100.00").await;

    let err = h
        .state
        .settlement
        .buy(&customer, purchase(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code().as_u16(), 404);
}

#[tokio::test]
async fn malformed_beneficiary_is_rejected_before_any_call() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&admin, "20.00", Audience::Regular).await;

    let input = PurchaseInput {
        plan_id: plan.id,
        beneficiary_number: "call me".into(),
    };
    let err = h.state.settlement.buy(&customer, input).await.unwrap_err();
    assert_eq!(err.status_code().as_u16(), 400);
    assert_eq!(h.provisioner.calls(), 0);
}

#[tokio::test]
async fn agent_purchase_checks_agent_float_before_gateway() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "10.00").await;
    let customer = h.user(Role::Regular, "0").await;
    let plan = h.plan(&agent, "50.00", Audience::Regular).await;

    let err = h
        .state
        .settlement
        .initialize_agent_purchase(&customer, purchase(plan.id))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InsufficientFunds { .. }));
    assert_eq!(h.gateway.calls(), 0);
    assert!(h.store.transactions().await.is_empty());
}

#[tokio::test]
async fn agent_purchase_creates_incomplete_transaction_and_threads_metadata() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "100.00").await;
    let customer = h.user(Role::Regular, "0").await;
    let plan = h.plan(&agent, "25.50", Audience::Regular).await;

    let payment = h
        .state
        .settlement
        .initialize_agent_purchase(&customer, purchase(plan.id))
        .await
        .unwrap();

    let txs = h.store.transactions().await;
    assert_eq!(txs.len(), 1);
    let tx = &txs[0];
    assert_eq!(tx.status, TransactionStatus::Incomplete);
    assert_eq!(tx.transaction_type, TransactionType::Purchase);
    assert_eq!(tx.amount, dec("25.50"));
    assert_eq!(tx.reference.as_deref(), Some(payment.reference.as_str()));

    let sent = h.gateway.last();
    assert_eq!(sent.amount_minor, 2550);
    assert_eq!(sent.email, customer.email);
    let metadata = sent.metadata.to_value();
    assert_eq!(metadata["charge_for"], "buy-bundle");
    assert_eq!(metadata["transaction_id"], tx.id.to_string());
    assert_eq!(metadata["agent_id"], agent.id.to_string());
    assert_eq!(metadata["plan_id"], plan.id.to_string());
    assert_eq!(metadata["package_size"], "5GB");

    assert_eq!(h.balance(&agent).await, dec("100.00"));
    assert!(h.store.orders().await.is_empty());
}

#[tokio::test]
async fn agent_purchase_gateway_failure_marks_transaction_failed() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "100.00").await;
    let customer = h.user(Role::Regular, "0").await;
    let plan = h.plan(&agent, "25.00", Audience::Regular).await;
    h.gateway.fail_with_connection_error();

    let err = h
        .state
        .settlement
        .initialize_agent_purchase(&customer, purchase(plan.id))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Gateway(_)));
    assert_eq!(err.status_code().as_u16(), 500);
    let txs = h.store.transactions().await;
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn plans_owned_by_non_agents_cannot_be_bought_through_the_gateway() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "500.00").await;
    let customer = h.user(Role::Regular, "0").await;
    let plan = h.plan(&admin, "25.00", Audience::Regular).await;

    let err = h
        .state
        .settlement
        .initialize_agent_purchase(&customer, purchase(plan.id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code().as_u16(), 400);
    assert_eq!(h.gateway.calls(), 0);
}

#[tokio::test]
async fn topup_initialization_converts_to_minor_units() {
    let h = Harness::new();
    let user = h.user(Role::Regular, "0").await;

    let payment = h
        .state
        .settlement
        .initialize_payment(&user, PaymentPurpose::Topup { amount: dec("5000.00") })
        .await
        .unwrap();

    let sent = h.gateway.last();
    assert_eq!(sent.amount_minor, 500_000);
    assert_eq!(sent.reference, payment.reference);
    assert_eq!(sent.metadata.to_value()["charge_for"], "topup");
    assert_eq!(sent.metadata.to_value()["user_internal_id"], user.id.to_string());
}

#[tokio::test]
async fn topup_amount_must_be_positive_and_whole_minor_units() {
    let h = Harness::new();
    let user = h.user(Role::Regular, "0").await;

    for amount in ["0", "-5.00", "1.005"] {
        let err = h
            .state
            .settlement
            .initialize_payment(&user, PaymentPurpose::Topup { amount: dec(amount) })
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400, "amount {}", amount);
    }
    assert_eq!(h.gateway.calls(), 0);
}

#[tokio::test]
async fn agent_registration_charges_configured_fee_to_regular_users_only() {
    let h = Harness::new();
    let regular = h.user(Role::Regular, "0").await;
    let agent = h.user(Role::Agent, "0").await;

    h.state
        .settlement
        .initialize_payment(&regular, PaymentPurpose::AgentReg)
        .await
        .unwrap();
    let sent = h.gateway.last();
    assert_eq!(sent.amount_minor, 5_000);
    assert_eq!(sent.metadata.to_value()["charge_for"], "agent_reg");

    let err = h
        .state
        .settlement
        .initialize_payment(&agent, PaymentPurpose::AgentReg)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
    assert_eq!(h.gateway.calls(), 1);
}

#[tokio::test]
async fn orders_are_listed_newest_first() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let customer = h.user(Role::Regular, "100.00").await;
    let other = h.user(Role::Regular, "100.00").await;
    let plan = h.plan(&admin, "10.00", Audience::Regular).await;

    let first = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = h.state.settlement.buy(&customer, purchase(plan.id)).await.unwrap();
    h.state.settlement.buy(&other, purchase(plan.id)).await.unwrap();

    let orders = h.state.settlement.orders_for(&customer).await.unwrap();
    let ids: Vec<_> = orders.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}
