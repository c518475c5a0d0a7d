pub mod client;

pub use client::{ProvisioningClient, ProvisioningError};
