//! Domain entities.
//! Framework-agnostic representation of users, wallets, plans, orders and
//! the money movements between them.

pub mod metadata;
pub mod money;
pub mod order;
pub mod payment_request;
pub mod plan;
pub mod transaction;
pub mod user;
pub mod wallet;

pub use metadata::{BundlePurchase, ChargeMetadata, METADATA_VERSION};
pub use order::{Order, OrderStatus};
pub use payment_request::{PaymentRequest, PaymentRequestStatus};
pub use plan::{Audience, BundlePlan};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use user::{Role, User};
pub use wallet::Wallet;

/// Declares a closed, string-backed enumeration stored as TEXT.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

pub(crate) use text_enum;
