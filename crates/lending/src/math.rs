//! Checked integer helpers for settlement math.
//!
//! Every formula multiplies first and divides once at the end. The product is
//! carried in 256 bits so realistic 18-decimal quantities do not overflow
//! before the division brings them back into range.

use primitive_types::U256;

use ledgerbank_core::{DomainError, DomainResult};

pub fn checked_mul(a: u128, b: u128, what: &str) -> DomainResult<u128> {
    a.checked_mul(b)
        .ok_or_else(|| DomainError::invalid_amount(format!("{what} overflows")))
}

/// `floor(a * b / d)` with a 256-bit intermediate product.
///
/// Fails when `d` is zero or the quotient does not fit in `u128`.
pub fn mul_div_floor(a: u128, b: u128, d: u128, what: &str) -> DomainResult<u128> {
    let overflow = || DomainError::invalid_amount(format!("{what} overflows"));

    // Two u128 factors always fit in 256 bits.
    let product = U256::from(a).checked_mul(U256::from(b)).ok_or_else(overflow)?;
    let quotient = product
        .checked_div(U256::from(d))
        .ok_or_else(|| DomainError::invalid_amount(format!("{what}: division by zero")))?;

    if quotient.bits() > 128 {
        return Err(overflow());
    }
    Ok(quotient.low_u128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_values_match_native_math() {
        assert_eq!(mul_div_floor(10 * 150, 5, 100, "x").unwrap(), 75);
        assert_eq!(mul_div_floor(7, 3, 2, "x").unwrap(), 10);
        assert_eq!(mul_div_floor(0, u128::MAX, 1, "x").unwrap(), 0);
    }

    #[test]
    fn wide_intermediate_products_are_exact() {
        // (2^127) * 6 / 3 = 2^128 -> does not fit.
        assert!(mul_div_floor(1 << 127, 6, 3, "x").is_err());
        // (2^127) * 6 / 4 = 3 * 2^126
        assert_eq!(mul_div_floor(1 << 127, 6, 4, "x").unwrap(), 3 << 126);
        assert_eq!(mul_div_floor(u128::MAX, u128::MAX, u128::MAX, "x").unwrap(), u128::MAX);
    }

    #[test]
    fn eighteen_decimal_scaling_round_trips_at_the_top_of_the_range() {
        let scale = 1_000_000_000_000_000_000u128;
        assert_eq!(mul_div_floor(u128::MAX, scale, scale, "x").unwrap(), u128::MAX);
        assert_eq!(mul_div_floor(u128::MAX - 1, scale + 1, scale + 1, "x").unwrap(), u128::MAX - 1);
        assert!(mul_div_floor(u128::MAX, 3, 2, "x").is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(matches!(
            mul_div_floor(1, 1, 0, "fee"),
            Err(DomainError::InvalidAmount(_))
        ));
    }

    proptest! {
        #[test]
        fn agrees_with_native_math_when_product_fits(
            a in 0u128..u64::MAX as u128,
            b in 0u128..u64::MAX as u128,
            d in 1u128..u128::MAX,
        ) {
            prop_assert_eq!(mul_div_floor(a, b, d, "x").unwrap(), a * b / d);
        }
    }
}
