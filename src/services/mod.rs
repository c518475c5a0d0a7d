pub mod order_sync;
pub mod settlement;
pub mod webhook;

pub use order_sync::{OrderSyncService, RetryPolicy, SyncReport};
pub use settlement::{PaymentPurpose, PurchaseInput, SettlementService, WithdrawalInput};
pub use webhook::{WebhookError, WebhookOutcome, WebhookService};
