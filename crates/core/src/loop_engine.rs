//! Forward leverage loop: deposit, then borrow and re-deposit a geometric
//! series of amounts.
//!
//! The engine account takes transient custody of the principal and of every
//! borrowed amount, but each one is deposited back into the pool in the same
//! step, credited to the user. Nothing stays with the engine.

use alloy::primitives::{Address, U256};
use looper_chain::u256_math::{percent_mul, wad_to_f64};
use looper_chain::{Market, PoolError, RateMode, NATIVE_TOKEN};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::errors::LeverResult;

/// Per-iteration amounts. Loops are capped at 40 rounds; most fit inline.
pub type IterationAmounts = SmallVec<[U256; 16]>;

/// Parameters of one loop call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Asset to supply and borrow
    pub asset: Address,
    /// Principal pulled from the caller (asset units)
    pub principal: U256,
    pub rate_mode: RateMode,
    /// Fraction of each deposit borrowed again (bps)
    pub borrow_ratio: u16,
    /// Deposit rounds, principal included
    pub iteration_count: u32,
}

/// What a loop did to the caller's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub asset: Address,
    pub rate_mode: RateMode,
    /// Deposited amount of every round; `amounts[0]` is the principal
    pub amounts: IterationAmounts,
    pub total_deposited: U256,
    pub total_borrowed: U256,
}

impl LoopOutcome {
    /// Deposited amount over principal, as a display ratio.
    pub fn leverage(&self) -> f64 {
        match self.amounts.first() {
            Some(principal) if !principal.is_zero() => {
                wad_to_f64(self.total_deposited) / wad_to_f64(*principal)
            }
            _ => 0.0,
        }
    }
}

/// Geometric series `a_0 = principal`, `a_i = a_{i-1} * ratio / 10000`,
/// truncated at every step. Stops early once an amount truncates to zero.
pub fn iteration_amounts(
    principal: U256,
    borrow_ratio: u16,
    iteration_count: u32,
) -> IterationAmounts {
    let ratio = U256::from(borrow_ratio);
    let mut amounts = IterationAmounts::new();
    let mut amount = principal;

    for _ in 0..iteration_count {
        if amount.is_zero() {
            break;
        }
        amounts.push(amount);
        amount = percent_mul(amount, ratio);
    }
    amounts
}

/// Give the pool an unlimited allowance on `asset` from `owner` unless the
/// current one already covers `needed`.
pub fn ensure_pool_allowance<M>(
    market: &mut M,
    owner: Address,
    asset: Address,
    needed: U256,
) -> LeverResult<()>
where
    M: Market + ?Sized,
{
    let pool = market.address();
    if market.allowance(asset, owner, pool) < needed {
        debug!(asset = %asset, owner = %owner, "Approving pool");
        market.approve(asset, owner, pool, U256::MAX)?;
    }
    Ok(())
}

/// Pull `principal` of `asset` from the caller into the engine account.
pub fn pull_principal<M>(
    market: &mut M,
    engine: Address,
    caller: Address,
    asset: Address,
    principal: U256,
) -> LeverResult<()>
where
    M: Market + ?Sized,
{
    market.transfer_from(asset, engine, caller, engine, principal)?;
    Ok(())
}

/// Move attached native value from the caller to the engine and wrap it.
/// Returns the wrapped-native asset.
pub fn pull_native<M>(
    market: &mut M,
    engine: Address,
    caller: Address,
    value: U256,
) -> LeverResult<Address>
where
    M: Market + ?Sized,
{
    market.transfer(NATIVE_TOKEN, caller, engine, value)?;
    market.wrap_native(engine, value)?;
    Ok(market.wrapped_native())
}

/// Run the loop with the principal already held by the engine.
///
/// Deposits the principal on the caller's behalf, then for each further
/// round borrows the next amount against the caller's position and deposits
/// it back. A zero principal is refused like the pool refuses a zero deposit.
pub fn execute<M>(
    market: &mut M,
    engine: Address,
    caller: Address,
    config: &LoopConfig,
) -> LeverResult<LoopOutcome>
where
    M: Market + ?Sized,
{
    let LoopConfig {
        asset,
        principal,
        rate_mode,
        borrow_ratio,
        iteration_count,
    } = *config;
    if principal.is_zero() {
        return Err(PoolError::ZeroAmount.into());
    }

    let amounts = iteration_amounts(principal, borrow_ratio, iteration_count);
    let total_deposited = amounts
        .iter()
        .fold(U256::ZERO, |acc, amount| acc + *amount);

    ensure_pool_allowance(market, engine, asset, total_deposited)?;

    for (round, amount) in amounts.iter().enumerate() {
        if round > 0 {
            market.borrow(engine, asset, *amount, rate_mode, caller)?;
        }
        market.deposit(engine, asset, *amount, caller)?;
        debug!(round, amount = %amount, "Loop round");
    }

    Ok(LoopOutcome {
        asset,
        rate_mode,
        total_borrowed: total_deposited.saturating_sub(principal),
        total_deposited,
        amounts,
    })
}
