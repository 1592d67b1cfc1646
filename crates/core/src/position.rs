//! Read-only view of a user's looped position on one asset.

use alloy::primitives::{Address, U256};
use looper_chain::u256_math::{self, wad_to_f64};
use looper_chain::{LendingPool, PriceOracle, TokenLedger};
use serde::Serialize;

use crate::errors::LeverResult;

/// Balances of one user on one reserve, read straight from the pool.
///
/// Never cached between calls; load a fresh view after every operation.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub user: Address,
    pub asset: Address,
    /// Collateral-receipt balance (asset units)
    pub collateral: U256,
    pub variable_debt: U256,
    pub stable_debt: U256,
    /// Oracle price (8 decimals)
    pub price: U256,
    pub decimals: u8,
    /// Account-wide health factor (WAD)
    pub health_factor: U256,
}

impl Position {
    pub fn load<M>(market: &M, user: Address, asset: Address) -> LeverResult<Self>
    where
        M: LendingPool + PriceOracle + TokenLedger + ?Sized,
    {
        let reserve = market.get_reserve_data(asset)?;
        let account = market.get_user_account_data(user)?;

        Ok(Self {
            user,
            asset,
            collateral: market.balance_of(reserve.collateral_token, user),
            variable_debt: market.balance_of(reserve.variable_debt_token, user),
            stable_debt: market.balance_of(reserve.stable_debt_token, user),
            price: market.get_asset_price(asset)?,
            decimals: reserve.decimals,
            health_factor: account.health_factor,
        })
    }

    pub fn debt(&self) -> U256 {
        self.variable_debt + self.stable_debt
    }

    pub fn has_debt(&self) -> bool {
        !self.debt().is_zero()
    }

    /// Collateral value in base currency (WAD).
    pub fn collateral_value_wad(&self) -> U256 {
        u256_math::calculate_value_wad(self.collateral, self.price, self.decimals)
    }

    /// Debt value in base currency (WAD).
    pub fn debt_value_wad(&self) -> U256 {
        u256_math::calculate_value_wad(self.debt(), self.price, self.decimals)
    }

    /// Health factor as f64 for display. `f64::INFINITY` without debt.
    pub fn health_factor_f64(&self) -> f64 {
        if self.health_factor == U256::MAX {
            f64::INFINITY
        } else {
            wad_to_f64(self.health_factor)
        }
    }
}
