//! In-memory Aave-style lending pool.
//!
//! Implements every collaborator trait over a single [`Ledger`]:
//! collateral-receipt and debt instruments are ordinary ledger tokens, the
//! pool's liquidity is the pool account's underlying balance, and prices come
//! from a shared [`PriceBook`]. Each call validates fully before it writes,
//! so a refused call never leaves partial effects even outside a transaction.

use alloy::primitives::{Address, U256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::{
    LendingPool, PriceOracle, RateMode, ReserveData, TokenLedger, Transactional, UserAccountData,
};
use crate::errors::{PoolError, PoolResult};
use crate::ledger::Ledger;
use crate::oracle::PriceBook;
use crate::u256_math::{calculate_hf_wad, calculate_value_wad, is_liquidatable_wad, percent_mul};

/// Ledger token id of the chain's native currency.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Lending pool, token ledger and oracle in one process.
#[derive(Debug)]
pub struct MemoryPool {
    /// Pool account in the ledger (holds liquidity)
    address: Address,
    /// Wrapped-native token
    wrapped_native: Address,
    /// Balances, allowances and delegations
    ledger: Ledger,
    /// Reserve configuration by underlying asset
    reserves: HashMap<Address, ReserveData>,
    /// Reserve registration order, for deterministic aggregation
    reserve_order: Vec<Address>,
    /// Collateral-receipt instrument -> underlying asset
    collateral_tokens: HashMap<Address, Address>,
    /// Stable and variable debt instruments
    debt_tokens: HashSet<Address>,
    /// Oracle prices
    prices: Arc<PriceBook>,
}

impl MemoryPool {
    /// Create an empty pool with its own price book.
    pub fn new(address: Address, wrapped_native: Address) -> Self {
        Self::with_prices(address, wrapped_native, Arc::new(PriceBook::new()))
    }

    /// Create an empty pool reading prices from a shared book.
    pub fn with_prices(address: Address, wrapped_native: Address, prices: Arc<PriceBook>) -> Self {
        Self {
            address,
            wrapped_native,
            ledger: Ledger::new(),
            reserves: HashMap::new(),
            reserve_order: Vec::new(),
            collateral_tokens: HashMap::new(),
            debt_tokens: HashSet::new(),
            prices,
        }
    }

    /// Shared handle to the price book.
    pub fn prices(&self) -> Arc<PriceBook> {
        self.prices.clone()
    }

    /// Register a reserve.
    pub fn init_reserve(&mut self, reserve: ReserveData) -> PoolResult<()> {
        reserve.validate()?;

        if self.reserves.contains_key(&reserve.asset) {
            return Err(PoolError::ReserveAlreadyInitialized(reserve.asset));
        }
        let in_use = |token: &Address| {
            self.collateral_tokens.contains_key(token)
                || self.debt_tokens.contains(token)
                || self.reserves.contains_key(token)
        };
        if in_use(&reserve.collateral_token)
            || in_use(&reserve.stable_debt_token)
            || in_use(&reserve.variable_debt_token)
        {
            return Err(PoolError::InvalidReserveConfig {
                asset: reserve.asset,
                reason: "instrument already registered".to_string(),
            });
        }

        debug!(
            asset = %reserve.asset,
            collateral_token = %reserve.collateral_token,
            ltv = reserve.ltv,
            liquidation_threshold = reserve.liquidation_threshold,
            "Reserve initialized"
        );

        self.collateral_tokens
            .insert(reserve.collateral_token, reserve.asset);
        self.debt_tokens.insert(reserve.stable_debt_token);
        self.debt_tokens.insert(reserve.variable_debt_token);
        self.reserve_order.push(reserve.asset);
        self.reserves.insert(reserve.asset, reserve);
        Ok(())
    }

    /// Registered reserves, in registration order.
    pub fn reserves(&self) -> impl Iterator<Item = &ReserveData> {
        self.reserve_order.iter().filter_map(|a| self.reserves.get(a))
    }

    /// Faucet: mint `amount` of any token (or [`NATIVE_TOKEN`]) to `holder`.
    pub fn mint(&mut self, holder: Address, token: Address, amount: U256) -> PoolResult<()> {
        self.ledger.credit(holder, token, amount)
    }

    fn reserve(&self, asset: Address) -> PoolResult<&ReserveData> {
        self.reserves
            .get(&asset)
            .ok_or(PoolError::UnknownReserve(asset))
    }

    fn require_balance(&self, token: Address, holder: Address, amount: U256) -> PoolResult<()> {
        let available = self.ledger.balance(holder, token);
        if available < amount {
            return Err(PoolError::InsufficientBalance {
                token,
                holder,
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn require_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> PoolResult<()> {
        let available = self.ledger.allowance(owner, spender, token);
        if available < amount {
            return Err(PoolError::InsufficientAllowance {
                token,
                owner,
                spender,
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn require_liquidity(&self, asset: Address, amount: U256) -> PoolResult<()> {
        let available = self.ledger.balance(self.address, asset);
        if available < amount {
            return Err(PoolError::InsufficientLiquidity {
                asset,
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Aggregate a user's position, optionally with `removed` units of one
    /// collateral instrument taken out first.
    fn account_data(
        &self,
        user: Address,
        removal: Option<(Address, U256)>,
    ) -> PoolResult<UserAccountData> {
        let mut total_collateral = U256::ZERO;
        let mut total_debt = U256::ZERO;
        let mut weighted_lt = U256::ZERO;
        let mut weighted_ltv = U256::ZERO;

        for reserve in self.reserves() {
            let mut collateral = self.ledger.balance(user, reserve.collateral_token);
            if let Some((token, removed)) = removal {
                if token == reserve.collateral_token {
                    collateral = collateral.saturating_sub(removed);
                }
            }
            let debt = self.ledger.balance(user, reserve.stable_debt_token)
                + self.ledger.balance(user, reserve.variable_debt_token);

            if collateral.is_zero() && debt.is_zero() {
                continue;
            }

            let price = self.prices.get_asset_price(reserve.asset)?;

            if !collateral.is_zero() {
                let value = calculate_value_wad(collateral, price, reserve.decimals);
                total_collateral += value;
                weighted_lt += value * U256::from(reserve.liquidation_threshold);
                weighted_ltv += value * U256::from(reserve.ltv);
            }
            if !debt.is_zero() {
                total_debt += calculate_value_wad(debt, price, reserve.decimals);
            }
        }

        let (liquidation_threshold, ltv) = if total_collateral.is_zero() {
            (U256::ZERO, U256::ZERO)
        } else {
            (weighted_lt / total_collateral, weighted_ltv / total_collateral)
        };

        Ok(UserAccountData {
            total_collateral,
            total_debt,
            available_borrows: percent_mul(total_collateral, ltv).saturating_sub(total_debt),
            current_liquidation_threshold: liquidation_threshold,
            ltv,
            health_factor: calculate_hf_wad(
                percent_mul(total_collateral, liquidation_threshold),
                total_debt,
            ),
        })
    }

    /// Refuse a collateral removal that would leave an indebted user with a
    /// health factor below 1.
    fn require_healthy_after_removal(
        &self,
        user: Address,
        collateral_token: Address,
        amount: U256,
    ) -> PoolResult<()> {
        let after = self.account_data(user, Some((collateral_token, amount)))?;
        if !after.total_debt.is_zero() && is_liquidatable_wad(after.health_factor) {
            return Err(PoolError::HealthFactorTooLow {
                health_factor: after.health_factor,
            });
        }
        Ok(())
    }

    fn move_token(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> PoolResult<()> {
        if self.debt_tokens.contains(&token) {
            return Err(PoolError::NonTransferable(token));
        }
        self.require_balance(token, from, amount)?;
        if self.collateral_tokens.contains_key(&token) {
            self.require_healthy_after_removal(from, token, amount)?;
        }
        self.ledger.move_balance(token, from, to, amount)
    }
}

impl LendingPool for MemoryPool {
    fn address(&self) -> Address {
        self.address
    }

    fn deposit(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        on_behalf_of: Address,
    ) -> PoolResult<()> {
        if amount.is_zero() {
            return Err(PoolError::ZeroAmount);
        }
        let collateral_token = self.reserve(asset)?.collateral_token;
        let pool = self.address;

        self.require_balance(asset, sender, amount)?;
        self.require_allowance(asset, sender, pool, amount)?;

        self.ledger.spend_allowance(sender, pool, asset, amount)?;
        self.ledger.move_balance(asset, sender, pool, amount)?;
        self.ledger.credit(on_behalf_of, collateral_token, amount)?;

        debug!(
            asset = %asset,
            sender = %sender,
            on_behalf_of = %on_behalf_of,
            amount = %amount,
            "Deposit"
        );
        Ok(())
    }

    fn borrow(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> PoolResult<()> {
        if amount.is_zero() {
            return Err(PoolError::ZeroAmount);
        }
        let reserve = self.reserve(asset)?.clone();
        if !reserve.borrowing_enabled {
            return Err(PoolError::BorrowingDisabled(asset));
        }
        let debt_token = reserve.debt_token(rate_mode);

        if sender != on_behalf_of {
            let available = self.ledger.delegation(on_behalf_of, sender, debt_token);
            if available < amount {
                return Err(PoolError::InsufficientDelegation {
                    debt_token,
                    delegator: on_behalf_of,
                    delegatee: sender,
                    required: amount,
                    available,
                });
            }
        }
        self.require_liquidity(asset, amount)?;

        let account = self.account_data(on_behalf_of, None)?;
        if account.total_collateral.is_zero() {
            return Err(PoolError::CollateralBalanceZero);
        }

        let price = self.prices.get_asset_price(asset)?;
        let value = calculate_value_wad(amount, price, reserve.decimals);
        if value > account.available_borrows {
            return Err(PoolError::BorrowCapacityExceeded {
                requested: value,
                available: account.available_borrows,
            });
        }
        let health_factor = calculate_hf_wad(
            percent_mul(account.total_collateral, account.current_liquidation_threshold),
            account.total_debt + value,
        );
        if is_liquidatable_wad(health_factor) {
            return Err(PoolError::HealthFactorTooLow { health_factor });
        }

        if sender != on_behalf_of {
            self.ledger
                .spend_delegation(on_behalf_of, sender, debt_token, amount)?;
        }
        self.ledger.credit(on_behalf_of, debt_token, amount)?;
        self.ledger.move_balance(asset, self.address, sender, amount)?;

        debug!(
            asset = %asset,
            sender = %sender,
            on_behalf_of = %on_behalf_of,
            amount = %amount,
            rate_mode = %rate_mode,
            "Borrow"
        );
        Ok(())
    }

    fn repay(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        rate_mode: RateMode,
        on_behalf_of: Address,
    ) -> PoolResult<U256> {
        if amount.is_zero() {
            return Err(PoolError::ZeroAmount);
        }
        let debt_token = self.reserve(asset)?.debt_token(rate_mode);
        let pool = self.address;

        let owed = self.ledger.balance(on_behalf_of, debt_token);
        if owed.is_zero() {
            return Err(PoolError::NoDebtOfSelectedType {
                user: on_behalf_of,
                debt_token,
            });
        }
        let payment = amount.min(owed);

        self.require_balance(asset, sender, payment)?;
        self.require_allowance(asset, sender, pool, payment)?;

        self.ledger.spend_allowance(sender, pool, asset, payment)?;
        self.ledger.move_balance(asset, sender, pool, payment)?;
        self.ledger.debit(on_behalf_of, debt_token, payment)?;

        debug!(
            asset = %asset,
            sender = %sender,
            on_behalf_of = %on_behalf_of,
            amount = %payment,
            rate_mode = %rate_mode,
            "Repay"
        );
        Ok(payment)
    }

    fn withdraw(
        &mut self,
        sender: Address,
        asset: Address,
        amount: U256,
        to: Address,
    ) -> PoolResult<U256> {
        let collateral_token = self.reserve(asset)?.collateral_token;
        let balance = self.ledger.balance(sender, collateral_token);
        let amount = if amount == U256::MAX { balance } else { amount };

        if amount.is_zero() {
            return Err(PoolError::ZeroAmount);
        }
        self.require_balance(collateral_token, sender, amount)?;
        self.require_liquidity(asset, amount)?;
        self.require_healthy_after_removal(sender, collateral_token, amount)?;

        self.ledger.debit(sender, collateral_token, amount)?;
        self.ledger.move_balance(asset, self.address, to, amount)?;

        debug!(
            asset = %asset,
            sender = %sender,
            to = %to,
            amount = %amount,
            "Withdraw"
        );
        Ok(amount)
    }

    fn get_user_account_data(&self, user: Address) -> PoolResult<UserAccountData> {
        self.account_data(user, None)
    }

    fn get_reserve_data(&self, asset: Address) -> PoolResult<ReserveData> {
        self.reserve(asset).cloned()
    }
}

impl PriceOracle for MemoryPool {
    fn get_asset_price(&self, asset: Address) -> PoolResult<U256> {
        self.prices.get_asset_price(asset)
    }
}

impl TokenLedger for MemoryPool {
    fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.ledger.balance(holder, token)
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.ledger.allowance(owner, spender, token)
    }

    fn approve(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> PoolResult<()> {
        if self.debt_tokens.contains(&token) {
            return Err(PoolError::NonTransferable(token));
        }
        self.ledger.set_allowance(owner, spender, token, amount);
        Ok(())
    }

    fn transfer(
        &mut self,
        token: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> PoolResult<()> {
        self.move_token(token, owner, to, amount)
    }

    fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> PoolResult<()> {
        if self.debt_tokens.contains(&token) {
            return Err(PoolError::NonTransferable(token));
        }
        self.require_allowance(token, from, spender, amount)?;
        self.move_token(token, from, to, amount)?;
        self.ledger.spend_allowance(from, spender, token, amount)
    }

    fn borrow_allowance(
        &self,
        debt_token: Address,
        delegator: Address,
        delegatee: Address,
    ) -> U256 {
        self.ledger.delegation(delegator, delegatee, debt_token)
    }

    fn approve_delegation(
        &mut self,
        debt_token: Address,
        delegator: Address,
        delegatee: Address,
        amount: U256,
    ) -> PoolResult<()> {
        if !self.debt_tokens.contains(&debt_token) {
            return Err(PoolError::NotDebtInstrument(debt_token));
        }
        self.ledger
            .set_delegation(delegator, delegatee, debt_token, amount);
        Ok(())
    }

    fn wrapped_native(&self) -> Address {
        self.wrapped_native
    }

    fn wrap_native(&mut self, holder: Address, amount: U256) -> PoolResult<()> {
        self.ledger.debit(holder, NATIVE_TOKEN, amount)?;
        self.ledger.credit(holder, self.wrapped_native, amount)
    }

    fn unwrap_native(&mut self, holder: Address, amount: U256) -> PoolResult<()> {
        self.ledger.debit(holder, self.wrapped_native, amount)?;
        self.ledger.credit(holder, NATIVE_TOKEN, amount)
    }
}

impl Transactional for MemoryPool {
    fn begin(&mut self) -> PoolResult<()> {
        self.ledger.begin()
    }

    fn commit(&mut self) -> PoolResult<()> {
        self.ledger.commit()
    }

    fn rollback(&mut self) {
        self.ledger.rollback()
    }
}
