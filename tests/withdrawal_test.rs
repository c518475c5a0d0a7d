mod common;

use bundle_core::domain::{PaymentRequestStatus, Role, TransactionType};
use bundle_core::error::AppError;
use bundle_core::services::WithdrawalInput;
use common::{dec, Harness};
use uuid::Uuid;

fn withdrawal(amount: &str) -> WithdrawalInput {
    WithdrawalInput {
        amount: dec(amount),
        receiver_number: "0201234567".to_string(),
        mobilemoney_name: "Kofi Mensah".to_string(),
    }
}

#[tokio::test]
async fn agent_requests_pending_withdrawal_without_debit() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "120.00").await;

    let request = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("100.00"))
        .await
        .unwrap();

    assert_eq!(request.status, PaymentRequestStatus::Pending);
    assert_eq!(request.agent_id, agent.id);
    assert_eq!(h.balance(&agent).await, dec("120.00"));
}

#[tokio::test]
async fn withdrawal_rules() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "50.00").await;
    let regular = h.user(Role::Regular, "50.00").await;

    let err = h
        .state
        .settlement
        .request_withdrawal(&regular, withdrawal("10.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let err = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("50.01"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));

    let err = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("0"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code().as_u16(), 400);
}

#[tokio::test]
async fn approval_debits_wallet_and_records_withdrawal() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let agent = h.user(Role::Agent, "120.00").await;
    let request = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("100.00"))
        .await
        .unwrap();

    let resolved = h
        .state
        .settlement
        .resolve_withdrawal(&admin, request.id, true)
        .await
        .unwrap();

    assert_eq!(resolved.status, PaymentRequestStatus::Approved);
    assert!(resolved.resolved_at.is_some());
    assert_eq!(h.balance(&agent).await, dec("20.00"));
    let txs = h.store.transactions().await;
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].transaction_type, TransactionType::Withdrawal);
    assert_eq!(txs[0].amount, dec("100.00"));
}

#[tokio::test]
async fn rejection_leaves_balance_alone() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let agent = h.user(Role::Agent, "120.00").await;
    let request = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("100.00"))
        .await
        .unwrap();

    let resolved = h
        .state
        .settlement
        .resolve_withdrawal(&admin, request.id, false)
        .await
        .unwrap();

    assert_eq!(resolved.status, PaymentRequestStatus::Rejected);
    assert_eq!(h.balance(&agent).await, dec("120.00"));
    assert!(h.store.transactions().await.is_empty());
}

#[tokio::test]
async fn resolved_requests_cannot_be_resolved_again() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let agent = h.user(Role::Agent, "120.00").await;
    let request = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("10.00"))
        .await
        .unwrap();
    h.state
        .settlement
        .resolve_withdrawal(&admin, request.id, true)
        .await
        .unwrap();

    let err = h
        .state
        .settlement
        .resolve_withdrawal(&admin, request.id, true)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.balance(&agent).await, dec("110.00"));
}

#[tokio::test]
async fn approval_fails_when_balance_was_spent_meanwhile() {
    let h = Harness::new();
    let admin = h.user(Role::Admin, "0").await;
    let agent = h.user(Role::Agent, "100.00").await;
    let first = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("80.00"))
        .await
        .unwrap();
    let second = h
        .state
        .settlement
        .request_withdrawal(&agent, withdrawal("80.00"))
        .await
        .unwrap();

    h.state
        .settlement
        .resolve_withdrawal(&admin, first.id, true)
        .await
        .unwrap();
    let err = h
        .state
        .settlement
        .resolve_withdrawal(&admin, second.id, true)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InsufficientFunds { .. }));
    assert_eq!(h.balance(&agent).await, dec("20.00"));
    assert_eq!(
        h.store.payment_request(second.id).await.unwrap().status,
        PaymentRequestStatus::Pending
    );
}

#[tokio::test]
async fn only_admins_resolve() {
    let h = Harness::new();
    let agent = h.user(Role::Agent, "100.00").await;

    let err = h
        .state
        .settlement
        .resolve_withdrawal(&agent, Uuid::new_v4(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
}
