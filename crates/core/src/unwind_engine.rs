//! Reverse of the loop: repeatedly withdraw what the health factor allows
//! and repay debt with it until none is left.

use alloy::primitives::{Address, U256};
use looper_chain::{Market, RateMode, ReserveData};
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{LeverError, LeverResult};
use crate::health::withdrawable;
use crate::loop_engine::ensure_pool_allowance;

/// Debt instruments are repaid in this order.
const REPAY_ORDER: [RateMode; 2] = [RateMode::Variable, RateMode::Stable];

/// What a close did to the caller's position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnwindOutcome {
    /// Withdraw/repay rounds executed
    pub steps: u32,
    pub total_withdrawn: U256,
    pub total_repaid: U256,
    /// Withdrawn collateral not needed for repayment, deposited back
    pub residual_redeposited: U256,
}

impl UnwindOutcome {
    pub fn is_noop(&self) -> bool {
        self.steps == 0
    }
}

fn outstanding_debt<M: Market + ?Sized>(market: &M, reserve: &ReserveData, user: Address) -> U256 {
    REPAY_ORDER.iter().fold(U256::ZERO, |acc, mode| {
        acc + market.balance_of(reserve.debt_token(*mode), user)
    })
}

/// Unwind `user`'s loop on `asset` through the `engine` account, taking at
/// most `max_steps` rounds. Succeeds without touching the market when the
/// user has no debt on `asset`.
pub fn close<M>(
    market: &mut M,
    engine: Address,
    user: Address,
    asset: Address,
    max_steps: u32,
) -> LeverResult<UnwindOutcome>
where
    M: Market + ?Sized,
{
    let reserve = market.get_reserve_data(asset)?;
    let mut outcome = UnwindOutcome::default();

    if outstanding_debt(market, &reserve, user).is_zero() {
        debug!(user = %user, asset = %asset, "No debt to unwind");
        return Ok(outcome);
    }

    ensure_pool_allowance(market, engine, asset, U256::MAX)?;

    while outcome.steps < max_steps {
        let remaining = outstanding_debt(market, &reserve, user);
        if remaining.is_zero() {
            break;
        }

        let snapshot = withdrawable(market, user, asset)?;
        let amount = snapshot.withdraw_amount;
        if amount.is_zero() {
            warn!(
                user = %user,
                asset = %asset,
                steps = outcome.steps,
                remaining_debt = %remaining,
                "Nothing withdrawable, unwind stuck"
            );
            return Err(LeverError::UnwindStuck {
                user,
                asset,
                steps: outcome.steps,
                remaining_debt: remaining,
            });
        }

        // the pool checks the user's health factor on this transfer
        market.transfer_from(reserve.collateral_token, engine, user, engine, amount)?;
        let withdrawn = market.withdraw(engine, asset, amount, engine)?;

        let mut available = withdrawn;
        for mode in REPAY_ORDER {
            if available.is_zero() {
                break;
            }
            let owed = market.balance_of(reserve.debt_token(mode), user);
            if owed.is_zero() {
                continue;
            }
            let repaid = market.repay(engine, asset, available.min(owed), mode, user)?;
            available -= repaid;
            outcome.total_repaid += repaid;
        }

        if !available.is_zero() {
            market.deposit(engine, asset, available, user)?;
            outcome.residual_redeposited += available;
        }

        outcome.steps += 1;
        outcome.total_withdrawn += withdrawn;

        debug!(
            step = outcome.steps,
            withdrawn = %withdrawn,
            residual = %available,
            afford = %snapshot.afford,
            "Unwind step"
        );
    }

    let remaining = outstanding_debt(market, &reserve, user);
    if !remaining.is_zero() {
        warn!(
            user = %user,
            asset = %asset,
            max_steps,
            remaining_debt = %remaining,
            "Unwind step bound exhausted"
        );
        return Err(LeverError::UnwindStuck {
            user,
            asset,
            steps: outcome.steps,
            remaining_debt: remaining,
        });
    }

    Ok(outcome)
}
