//! Collaborator interfaces for lending-pool interactions.
//!
//! The leverage engines only ever talk to a market through these traits:
//!
//! - [`LendingPool`]: deposit / borrow / repay / withdraw and account queries
//! - [`PriceOracle`]: asset prices (8 decimals)
//! - [`TokenLedger`]: transfers, approvals, borrow delegation, native wrapping
//! - [`Transactional`]: the all-or-nothing boundary around one operation
//!
//! [`Market`] bundles the four; [`MemoryPool`] implements it in process.
//!
//! # Example
//!
//! ```rust,ignore
//! use looper_chain::protocol::{atomically, LendingPool, Market};
//!
//! atomically(&mut pool, |m| {
//!     m.deposit(engine, asset, amount, user)?;
//!     m.borrow(engine, asset, amount / 2, RateMode::Variable, user)
//! })?;
//! ```

mod memory;

pub use memory::{MemoryPool, NATIVE_TOKEN};

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{PoolError, PoolResult};
use crate::u256_math::MAX_BPS;

/// Interest rate mode of a borrow position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    Stable,
    Variable,
}

impl FromStr for RateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stable" | "1" => Ok(Self::Stable),
            "variable" | "2" => Ok(Self::Variable),
            _ => Err(format!("unknown rate mode: {s}")),
        }
    }
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Variable => f.write_str("variable"),
        }
    }
}

/// Aggregate account snapshot, as reported by the pool.
///
/// Values are base-currency WAD; ratios are basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccountData {
    pub total_collateral: U256,
    pub total_debt: U256,
    pub available_borrows: U256,
    /// Collateral-weighted liquidation threshold (bps)
    pub current_liquidation_threshold: U256,
    /// Collateral-weighted loan-to-value (bps)
    pub ltv: U256,
    /// Health factor in WAD, `U256::MAX` without debt
    pub health_factor: U256,
}

/// Reserve configuration and instruments for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveData {
    /// Underlying token
    pub asset: Address,
    /// Collateral-receipt instrument (aToken / lToken)
    pub collateral_token: Address,
    /// Stable-rate debt instrument
    pub stable_debt_token: Address,
    /// Variable-rate debt instrument
    pub variable_debt_token: Address,
    /// Token decimals
    pub decimals: u8,
    /// Maximum loan-to-value (bps)
    pub ltv: u16,
    /// Liquidation threshold (bps)
    pub liquidation_threshold: u16,
    /// Whether the reserve can be borrowed
    pub borrowing_enabled: bool,
}

impl ReserveData {
    /// Debt instrument for the given rate mode.
    pub fn debt_token(&self, mode: RateMode) -> Address {
        match mode {
            RateMode::Stable => self.stable_debt_token,
            RateMode::Variable => self.variable_debt_token,
        }
    }

    /// Check the reserve's own invariants.
    pub fn validate(&self) -> PoolResult<()> {
        let invalid = |reason: &str| PoolError::InvalidReserveConfig {
            asset: self.asset,
            reason: reason.to_string(),
        };

        if self.liquidation_threshold > MAX_BPS {
            return Err(invalid("liquidation threshold above 100%"));
        }
        if self.ltv > self.liquidation_threshold {
            return Err(invalid("ltv above liquidation threshold"));
        }
        let instruments = [
            self.collateral_token,
            self.stable_debt_token,
            self.variable_debt_token,
        ];
        if instruments.contains(&self.asset)
            || instruments[0] == instruments[1]
            || instruments[0] == instruments[2]
            || instruments[1] == instruments[2]
        {
            return Err(invalid("instrument addresses must be distinct"));
        }
        Ok(())
    }
}

/// Core lending pool operations.
///
/// `sender` stands for the calling account: tokens are pulled from it on
/// deposit/repay, borrowed funds and withdrawals are paid to it.
pub trait LendingPool {
    /// Account identity of the pool itself in the token ledger.
    fn address(&self) -> Address;

    /// Supply `amount` of `asset` from `sender`, crediting `on_behalf_of`
    /// with the collateral-receipt instrument.
    fn deposit(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        on_behalf_of: Address,
    ) -> PoolResult<()>;

    /// Borrow `amount` of `asset` against `on_behalf_of`'s collateral, paying
    /// it to `sender`. Requires a borrow delegation when the two differ.
    fn borrow(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> PoolResult<()>;

    /// Repay up to `amount` of `on_behalf_of`'s debt with `sender`'s tokens.
    /// Returns the amount actually repaid.
    fn repay(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> PoolResult<U256>;

    /// Redeem `amount` of `sender`'s collateral (`U256::MAX` = all) and pay the
    /// underlying to `to`. Returns the amount withdrawn.
    fn withdraw(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        to: Address,
    ) -> PoolResult<U256>;

    fn get_user_account_data(&self, user: Address) -> PoolResult<UserAccountData>;

    fn get_reserve_data(&self, asset: Address) -> PoolResult<ReserveData>;
}

/// Asset price source. Prices carry [`crate::u256_math::PRICE_DECIMALS`].
pub trait PriceOracle {
    fn get_asset_price(&self, asset: Address) -> PoolResult<U256>;
}

/// Token operations: ERC20-style balances and approvals, borrow delegation
/// on debt instruments, and native-currency wrapping.
pub trait TokenLedger {
    fn balance_of(&self, token: Address, holder: Address) -> U256;

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256;

    fn approve(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> PoolResult<()>;

    /// Move `owner`'s own tokens.
    fn transfer(
        &mut self,
        token: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> PoolResult<()>;

    /// Move `from`'s tokens on `spender`'s allowance.
    fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> PoolResult<()>;

    fn borrow_allowance(&self, debt_token: Address, delegator: Address, delegatee: Address)
        -> U256;

    fn approve_delegation(
        &mut self,
        debt_token: Address,
        delegator: Address,
        delegatee: Address,
        amount: U256,
    ) -> PoolResult<()>;

    /// The wrapped-native token used as the native currency's reserve.
    fn wrapped_native(&self) -> Address;

    /// Convert `holder`'s native currency into wrapped-native tokens.
    fn wrap_native(&mut self, holder: Address, amount: U256) -> PoolResult<()>;

    /// Convert `holder`'s wrapped-native tokens back into native currency.
    fn unwrap_native(&mut self, holder: Address, amount: U256) -> PoolResult<()>;
}

/// All-or-nothing boundary around a sequence of market calls.
pub trait Transactional {
    fn begin(&mut self) -> PoolResult<()>;
    fn commit(&mut self) -> PoolResult<()>;
    fn rollback(&mut self);
}

/// Everything a leverage engine needs from its environment.
pub trait Market: LendingPool + PriceOracle + TokenLedger + Transactional {}

impl<T> Market for T where T: LendingPool + PriceOracle + TokenLedger + Transactional {}

/// Run `f` inside a transaction: commit if it succeeds, roll back otherwise.
pub fn atomically<M, T, E, F>(market: &mut M, f: F) -> Result<T, E>
where
    M: Transactional + ?Sized,
    E: From<PoolError>,
    F: FnOnce(&mut M) -> Result<T, E>,
{
    market.begin()?;
    match f(market) {
        Ok(value) => {
            market.commit()?;
            Ok(value)
        }
        Err(err) => {
            market.rollback();
            Err(err)
        }
    }
}
