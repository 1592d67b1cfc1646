//! Read-only health computations over the pool's account snapshot.
//!
//! Nothing here is cached: every call re-reads the pool and oracle, so a
//! snapshot is only valid for the state it was computed from.

use alloy::primitives::{Address, U256};
use looper_chain::u256_math::{
    calculate_hf_wad, calculate_value_wad, is_liquidatable_wad, percent_div, percent_mul,
    value_wad_to_amount,
};
use looper_chain::{LendingPool, PriceOracle, TokenLedger};
use serde::Serialize;

use crate::errors::LeverResult;

/// One value unit (1e-18 of base currency) held back from the withdrawable
/// value so per-asset truncation in the pool's valuation cannot tip the
/// health factor below 1.
const WITHDRAW_HEADROOM: U256 = U256::from_limbs([1, 0, 0, 0]);

/// Withdrawable capacity of one user on one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// Collateral value (WAD)
    pub total_collateral: U256,
    /// Debt value (WAD)
    pub total_debt: U256,
    /// Weighted liquidation threshold (bps)
    pub current_liquidation_threshold: U256,
    /// Threshold-adjusted collateral above the debt (WAD), never negative
    pub afford: U256,
    /// Collateral value that can leave while HF stays >= 1 (WAD)
    pub withdrawable_collateral: U256,
    /// `withdrawable_collateral` in asset units, capped at the collateral balance
    pub withdraw_amount: U256,
}

/// Compute how much of `asset` the user can withdraw right now.
pub fn withdrawable<M>(market: &M, user: Address, asset: Address) -> LeverResult<HealthSnapshot>
where
    M: LendingPool + PriceOracle + TokenLedger + ?Sized,
{
    let account = market.get_user_account_data(user)?;
    let reserve = market.get_reserve_data(asset)?;
    let lt = account.current_liquidation_threshold;

    let afford = percent_mul(account.total_collateral, lt).saturating_sub(account.total_debt);

    let withdrawable_collateral = if account.total_debt.is_zero() {
        account.total_collateral
    } else {
        percent_div(afford, lt).saturating_sub(WITHDRAW_HEADROOM)
    };

    let withdraw_amount = if withdrawable_collateral.is_zero() && afford.is_zero() {
        U256::ZERO
    } else {
        let price = market.get_asset_price(asset)?;
        let balance = market.balance_of(reserve.collateral_token, user);
        let to_amount = |value| value_wad_to_amount(value, price, reserve.decimals).min(balance);

        let amount = to_amount(withdrawable_collateral);
        if amount.is_zero() {
            // headroom truncated the last unit away; take the exact capacity
            // when it still leaves the health factor at or above 1
            let exact = to_amount(percent_div(afford, lt));
            let removed = calculate_value_wad(exact, price, reserve.decimals);
            let remaining = account.total_collateral.saturating_sub(removed);
            let hf = calculate_hf_wad(percent_mul(remaining, lt), account.total_debt);
            if is_liquidatable_wad(hf) {
                U256::ZERO
            } else {
                exact
            }
        } else {
            amount
        }
    };

    Ok(HealthSnapshot {
        total_collateral: account.total_collateral,
        total_debt: account.total_debt,
        current_liquidation_threshold: lt,
        afford,
        withdrawable_collateral,
        withdraw_amount,
    })
}

/// Health factor (WAD) after a hypothetical withdrawal of `amount` of
/// `asset`. `U256::MAX` without debt.
pub fn health_factor<M>(
    market: &M,
    user: Address,
    asset: Address,
    amount: U256,
) -> LeverResult<U256>
where
    M: LendingPool + PriceOracle + ?Sized,
{
    let account = market.get_user_account_data(user)?;
    if amount.is_zero() {
        return Ok(account.health_factor);
    }

    let reserve = market.get_reserve_data(asset)?;
    let price = market.get_asset_price(asset)?;
    let removed = calculate_value_wad(amount, price, reserve.decimals);
    let remaining = account.total_collateral.saturating_sub(removed);

    Ok(calculate_hf_wad(
        percent_mul(remaining, account.current_liquidation_threshold),
        account.total_debt,
    ))
}

/// Configured maximum LTV of `asset` (bps).
pub fn ltv<M>(market: &M, asset: Address) -> LeverResult<u16>
where
    M: LendingPool + ?Sized,
{
    Ok(market.get_reserve_data(asset)?.ltv)
}
