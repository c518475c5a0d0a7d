//! Webhook signature check: hex HMAC-SHA512 of the raw body keyed by the
//! gateway secret key.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

fn mac_for(secret: &str, body: &[u8]) -> Option<HmacSha512> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac)
}

pub fn sign(secret: &str, body: &[u8]) -> String {
    mac_for(secret, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Constant-time comparison of `signature` against the expected MAC.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    match mac_for(secret, body) {
        Some(mac) => mac.verify_slice(&expected).is_ok(),
        None => false,
    }
}
