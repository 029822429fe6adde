//! Mathematical Utilities for the Tren Protocol
//!
//! Fixed-point helpers on 18-decimal `u128` values. Products are formed in
//! 256 bits so `a * b / c` never overflows in the intermediate step.

use primitive_types::U256;

use crate::constants::{fees, precision::{DECIMAL_PRECISION, NICR_PRECISION}};
use crate::errors::{TrenError, TrenResult};

/// Narrow a 256-bit value back to `u128`
pub fn to_u128(value: U256) -> TrenResult<u128> {
    if value > U256::from(u128::MAX) {
        return Err(TrenError::Overflow);
    }
    Ok(value.as_u128())
}

/// `a * b / denominator`, rounded down
pub fn mul_div(a: u128, b: u128, denominator: u128) -> TrenResult<u128> {
    if denominator == 0 {
        return Err(TrenError::DivisionByZero);
    }
    to_u128(U256::from(a) * U256::from(b) / U256::from(denominator))
}

/// `a * b / denominator`, saturating at `u128::MAX` instead of failing
fn mul_div_saturating(a: u128, b: u128, denominator: u128) -> u128 {
    let wide = U256::from(a) * U256::from(b) / U256::from(denominator);
    if wide > U256::from(u128::MAX) {
        u128::MAX
    } else {
        wide.as_u128()
    }
}

/// Multiply two 18-decimal values, rounding half up
pub fn dec_mul(x: u128, y: u128) -> TrenResult<u128> {
    let prod = U256::from(x) * U256::from(y) + U256::from(DECIMAL_PRECISION / 2);
    to_u128(prod / U256::from(DECIMAL_PRECISION))
}

/// `base ^ minutes` for an 18-decimal base using exponentiation by squaring.
///
/// The exponent is capped at [`fees::MAX_DECAY_MINUTES`]; beyond that the
/// result is indistinguishable from zero for any decay factor in use.
pub fn dec_pow(base: u128, minutes: u64) -> TrenResult<u128> {
    let mut n = minutes.min(fees::MAX_DECAY_MINUTES);
    if n == 0 {
        return Ok(DECIMAL_PRECISION);
    }

    let mut y = DECIMAL_PRECISION;
    let mut x = base;
    while n > 1 {
        if n % 2 == 0 {
            x = dec_mul(x, x)?;
            n /= 2;
        } else {
            y = dec_mul(x, y)?;
            x = dec_mul(x, x)?;
            n = (n - 1) / 2;
        }
    }
    dec_mul(x, y)
}

/// Individual collateral ratio: `coll * price / debt`.
///
/// Zero debt returns `u128::MAX`, the "infinite" sentinel.
pub fn compute_cr(coll: u128, debt: u128, price: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    mul_div_saturating(coll, price, debt)
}

/// Nominal collateral ratio: `coll * 1e20 / debt`, price independent.
///
/// Zero debt returns `u128::MAX`.
pub fn compute_nominal_cr(coll: u128, debt: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    mul_div_saturating(coll, NICR_PRECISION, debt)
}

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> TrenResult<u128> {
    a.checked_add(b).ok_or(TrenError::Overflow)
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> TrenResult<u128> {
    a.checked_sub(b).ok_or(TrenError::Underflow)
}

/// Absolute difference of two values
pub fn abs_diff(a: u128, b: u128) -> u128 {
    if a >= b { a - b } else { b - a }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: u128 = DECIMAL_PRECISION;

    #[test]
    fn test_mul_div_wide_intermediate() {
        // (1e30 * 1e20) overflows u128 but the quotient fits
        let a = 1_000_000_000_000u128 * ONE;
        let r = mul_div(a, 100 * ONE, 1_000 * ONE).unwrap();
        assert_eq!(r, a / 10);
    }

    #[test]
    fn test_mul_div_errors() {
        assert_eq!(mul_div(1, 1, 0), Err(TrenError::DivisionByZero));
        assert_eq!(mul_div(u128::MAX, 2, 1), Err(TrenError::Overflow));
    }

    #[test]
    fn test_icr_calculation() {
        // 100 coll at price 20 backing 1000 debt = 200%
        assert_eq!(compute_cr(100 * ONE, 1_000 * ONE, 20 * ONE), 2 * ONE);
        // 110%
        assert_eq!(compute_cr(110 * ONE, 2_000 * ONE, 20 * ONE), 1_100_000_000_000_000_000);
    }

    #[test]
    fn test_icr_zero_debt() {
        assert_eq!(compute_cr(ONE, 0, 20 * ONE), u128::MAX);
        assert_eq!(compute_nominal_cr(ONE, 0), u128::MAX);
    }

    #[test]
    fn test_nominal_cr() {
        // 100 coll / 2000 debt = 0.05 * 1e20
        assert_eq!(compute_nominal_cr(100 * ONE, 2_000 * ONE), 5_000_000_000_000_000_000);
    }

    #[test]
    fn test_dec_mul_rounds_half_up() {
        assert_eq!(dec_mul(ONE / 2, 1).unwrap(), 1); // 0.5e-18 rounds to 1e-18
        assert_eq!(dec_mul(2 * ONE, 3 * ONE).unwrap(), 6 * ONE);
    }

    #[test]
    fn test_dec_pow_half_life() {
        // 720 minutes of decay halves the value (within rounding)
        let r = dec_pow(fees::MINUTE_DECAY_FACTOR, 720).unwrap();
        assert!(abs_diff(r, ONE / 2) < 1_000_000_000, "got {}", r);
        assert_eq!(dec_pow(fees::MINUTE_DECAY_FACTOR, 0).unwrap(), ONE);
        assert_eq!(dec_pow(fees::MINUTE_DECAY_FACTOR, 1).unwrap(), fees::MINUTE_DECAY_FACTOR);
    }

    #[test]
    fn test_dec_pow_exponent_capped() {
        let capped = dec_pow(fees::MINUTE_DECAY_FACTOR, u64::MAX).unwrap();
        assert_eq!(capped, 0);
    }

    #[test]
    fn test_safe_math() {
        assert_eq!(safe_add(1, 2).unwrap(), 3);
        assert_eq!(safe_add(u128::MAX, 1), Err(TrenError::Overflow));
        assert_eq!(safe_sub(1, 2), Err(TrenError::Underflow));
    }
}
