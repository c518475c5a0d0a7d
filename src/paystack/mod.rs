pub mod client;
pub mod signature;

pub use client::{GatewayError, PaystackClient};
pub use signature::{sign, verify_signature, SIGNATURE_HEADER};
