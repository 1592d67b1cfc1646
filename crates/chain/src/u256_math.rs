//! Fixed-point U256 arithmetic shared by the pool and the leverage engines.
//!
//! Every helper truncates toward zero. The pool and the health calculator
//! must agree bit-for-bit on valuations, so both go through this module.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

/// Basis points denominator as a plain integer, for ratio bounds.
pub const MAX_BPS: u16 = 10_000;

/// Oracle price decimals (8)
pub const PRICE_DECIMALS: u8 = 8;

/// Decimals of base-currency values (WAD)
pub const VALUE_DECIMALS: u8 = 18;

/// Pre-computed powers of 10 for fast decimal conversion
const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Fast power of 10 lookup (up to 10^38)
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// Apply a basis-point factor: value * bps / 10000.
///
/// Example: percent_mul(1000, 8000) = 800
#[inline(always)]
pub fn percent_mul(value: U256, bps: U256) -> U256 {
    (value * bps) / BPS_DENOMINATOR
}

/// Inverse of [`percent_mul`]: value * 10000 / bps. Zero when bps is zero.
#[inline(always)]
pub fn percent_div(value: U256, bps: U256) -> U256 {
    if bps.is_zero() {
        return U256::ZERO;
    }
    (value * BPS_DENOMINATOR) / bps
}

/// Base-currency value of a token amount, in WAD.
///
/// Formula: (amount * price * 10^18) / (10^decimals * 10^8)
///
/// Example: 1000 USDC (6 decimals) at $1 price = 1000 * 10^18 WAD
#[inline(always)]
pub fn calculate_value_wad(amount: U256, price: U256, decimals: u8) -> U256 {
    if amount.is_zero() || price.is_zero() {
        return U256::ZERO;
    }

    let scale_adjustment = VALUE_DECIMALS as i32 - decimals as i32 - PRICE_DECIMALS as i32;

    if scale_adjustment >= 0 {
        amount * price * pow10(scale_adjustment as u8)
    } else {
        (amount * price) / pow10((-scale_adjustment) as u8)
    }
}

/// Token amount worth `value_wad` at `price`. Inverse of
/// [`calculate_value_wad`], truncating; zero when the price is zero.
#[inline(always)]
pub fn value_wad_to_amount(value_wad: U256, price: U256, decimals: u8) -> U256 {
    if value_wad.is_zero() || price.is_zero() {
        return U256::ZERO;
    }

    let scale_adjustment = VALUE_DECIMALS as i32 - decimals as i32 - PRICE_DECIMALS as i32;

    if scale_adjustment >= 0 {
        value_wad / (price * pow10(scale_adjustment as u8))
    } else {
        (value_wad * pow10((-scale_adjustment) as u8)) / price
    }
}

/// Convert WAD (18 decimals) to f64.
/// Use only for display/logging, not for computation.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

/// Calculate health factor in WAD (18 decimals).
/// HF = (total_collateral_adjusted * 10^18) / total_debt
///
/// Returns U256::MAX if debt is zero.
#[inline(always)]
pub fn calculate_hf_wad(collateral_adjusted_wad: U256, debt_wad: U256) -> U256 {
    if debt_wad.is_zero() {
        return U256::MAX;
    }
    (collateral_adjusted_wad * WAD) / debt_wad
}

/// Check if health factor indicates liquidatable position (HF < 1.0).
#[inline(always)]
pub fn is_liquidatable_wad(hf_wad: U256) -> bool {
    hf_wad < WAD
}
