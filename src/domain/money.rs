//! Conversions between ledger amounts (major units, two fraction digits)
//! and gateway amounts (integer minor units).

use bigdecimal::{BigDecimal, ToPrimitive};

const MINOR_PER_MAJOR: i64 = 100;

/// Truncates an amount to the two fraction digits the ledger stores.
pub fn normalize(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale(2)
}

/// Converts a major-unit amount to minor units. Fails when the amount has
/// sub-minor precision or does not fit an i64.
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    let scaled = amount.clone() * BigDecimal::from(MINOR_PER_MAJOR);
    if scaled.with_scale(0) != scaled {
        return None;
    }
    scaled.with_scale(0).to_i64()
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    normalize(&(BigDecimal::from(minor) / BigDecimal::from(MINOR_PER_MAJOR)))
}

pub fn is_positive(amount: &BigDecimal) -> bool {
    amount > &BigDecimal::from(0)
}
