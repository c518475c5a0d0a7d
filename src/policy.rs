//! Role-based capability checks, run before every state-mutating operation.

use crate::domain::{Audience, Role, User};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BuyBundle { audience: Audience },
    InitializeAgentPurchase,
    InitializePayment,
    RegisterAsAgent,
    RequestWithdrawal,
    ResolveWithdrawal,
    SyncOrders,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::BuyBundle { .. } => "buy bundle",
            Operation::InitializeAgentPurchase => "initialize agent purchase",
            Operation::InitializePayment => "initialize payment",
            Operation::RegisterAsAgent => "register as agent",
            Operation::RequestWithdrawal => "request withdrawal",
            Operation::ResolveWithdrawal => "resolve withdrawal",
            Operation::SyncOrders => "sync orders",
        }
    }
}

pub fn is_permitted(role: Role, operation: Operation) -> bool {
    match operation {
        Operation::BuyBundle {
            audience: Audience::Agent,
        } => role == Role::Agent,
        Operation::BuyBundle {
            audience: Audience::Regular,
        }
        | Operation::InitializeAgentPurchase
        | Operation::InitializePayment => true,
        Operation::RegisterAsAgent => role == Role::Regular,
        Operation::RequestWithdrawal => role == Role::Agent,
        Operation::ResolveWithdrawal | Operation::SyncOrders => role == Role::Admin,
    }
}

pub fn authorize(user: &User, operation: Operation) -> Result<(), AppError> {
    if is_permitted(user.role, operation) {
        Ok(())
    } else {
        tracing::warn!(user_id = %user.id, role = %user.role, operation = operation.name(), "operation denied");
        Err(AppError::Unauthorized(format!(
            "role {} may not {}",
            user.role,
            operation.name()
        )))
    }
}
