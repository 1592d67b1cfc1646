//! Public entry points: loop, native loop, close, and read-only queries.
//!
//! Every mutating call validates its parameters, then runs inside one market
//! transaction. Any refusal rolls the whole call back.

use alloy::primitives::{Address, U256};
use looper_chain::{atomically, LendingPool, Market, PriceOracle, RateMode, TokenLedger};
use parking_lot::{Mutex, MutexGuard};
use tracing::{info, instrument};

use crate::config::UnwindConfig;
use crate::errors::{LeverError, LeverResult};
use crate::health::{self, HealthSnapshot};
use crate::loop_engine::{self, LoopConfig, LoopOutcome};
use crate::position::Position;
use crate::unwind_engine::{self, UnwindOutcome};
use crate::validator;

/// Leverage engine bound to one engine account.
///
/// The engine account takes transient custody of funds during a call and
/// holds nothing between calls. Users authorize it up front: a token
/// allowance for the principal, a borrow delegation on the debt instrument
/// and, for closing, an allowance on the collateral-receipt instrument.
#[derive(Debug)]
pub struct Leverager {
    address: Address,
    unwind: UnwindConfig,
    entered: Mutex<()>,
}

impl Leverager {
    pub fn new(address: Address, unwind: UnwindConfig) -> Self {
        Self {
            address,
            unwind,
            entered: Mutex::new(()),
        }
    }

    /// Engine account address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Claim the entry guard, refusing nested calls.
    fn enter(&self) -> LeverResult<MutexGuard<'_, ()>> {
        self.entered.try_lock().ok_or(LeverError::ReentrantCall)
    }

    /// Loop `config.principal` of `config.asset` pulled from `caller`.
    #[instrument(skip(self, market, config), fields(user = %caller, asset = %config.asset))]
    pub fn loop_asset<M>(
        &self,
        market: &mut M,
        caller: Address,
        config: &LoopConfig,
    ) -> LeverResult<LoopOutcome>
    where
        M: Market + ?Sized,
    {
        let _guard = self.enter()?;

        validator::validate_iteration_count(config.iteration_count)?;
        let ltv = health::ltv(market, config.asset)?;
        validator::validate(config.rate_mode, config.borrow_ratio, ltv, config.iteration_count)?;

        let outcome = atomically(market, |m| {
            loop_engine::pull_principal(m, self.address, caller, config.asset, config.principal)?;
            loop_engine::execute(m, self.address, caller, config)
        })?;

        info!(
            principal = %config.principal,
            rounds = outcome.amounts.len(),
            total_deposited = %outcome.total_deposited,
            total_borrowed = %outcome.total_borrowed,
            leverage = outcome.leverage(),
            "Loop complete"
        );
        Ok(outcome)
    }

    /// Loop attached native `value`, wrapped into the pool's wrapped-native
    /// asset first.
    #[instrument(skip(self, market), fields(user = %caller))]
    pub fn loop_native<M>(
        &self,
        market: &mut M,
        caller: Address,
        value: U256,
        rate_mode: RateMode,
        borrow_ratio: u16,
        iteration_count: u32,
    ) -> LeverResult<LoopOutcome>
    where
        M: Market + ?Sized,
    {
        let _guard = self.enter()?;

        validator::validate_iteration_count(iteration_count)?;
        let wrapped = market.wrapped_native();
        let ltv = health::ltv(market, wrapped)?;
        validator::validate(rate_mode, borrow_ratio, ltv, iteration_count)?;

        let config = LoopConfig {
            asset: wrapped,
            principal: value,
            rate_mode,
            borrow_ratio,
            iteration_count,
        };
        let outcome = atomically(market, |m| {
            loop_engine::pull_native(m, self.address, caller, value)?;
            loop_engine::execute(m, self.address, caller, &config)
        })?;

        info!(
            value = %value,
            rounds = outcome.amounts.len(),
            total_deposited = %outcome.total_deposited,
            total_borrowed = %outcome.total_borrowed,
            "Native loop complete"
        );
        Ok(outcome)
    }

    /// Unwind `caller`'s loop on `asset` until no debt remains.
    #[instrument(skip(self, market), fields(user = %caller, asset = %asset))]
    pub fn close<M>(
        &self,
        market: &mut M,
        caller: Address,
        asset: Address,
    ) -> LeverResult<UnwindOutcome>
    where
        M: Market + ?Sized,
    {
        let _guard = self.enter()?;

        let max_steps = self.unwind.max_steps;
        let outcome = atomically(market, |m| {
            unwind_engine::close(m, self.address, caller, asset, max_steps)
        })?;

        if outcome.is_noop() {
            info!("Nothing to close");
        } else {
            info!(
                steps = outcome.steps,
                total_withdrawn = %outcome.total_withdrawn,
                total_repaid = %outcome.total_repaid,
                residual = %outcome.residual_redeposited,
                "Close complete"
            );
        }
        Ok(outcome)
    }

    pub fn withdrawable<M>(
        &self,
        market: &M,
        user: Address,
        asset: Address,
    ) -> LeverResult<HealthSnapshot>
    where
        M: LendingPool + PriceOracle + TokenLedger + ?Sized,
    {
        health::withdrawable(market, user, asset)
    }

    /// Health factor (WAD) after withdrawing `amount` of `asset`.
    pub fn health_factor<M>(
        &self,
        market: &M,
        user: Address,
        asset: Address,
        amount: U256,
    ) -> LeverResult<U256>
    where
        M: LendingPool + PriceOracle + ?Sized,
    {
        health::health_factor(market, user, asset, amount)
    }

    pub fn ltv<M>(&self, market: &M, asset: Address) -> LeverResult<u16>
    where
        M: LendingPool + ?Sized,
    {
        health::ltv(market, asset)
    }

    pub fn position<M>(&self, market: &M, user: Address, asset: Address) -> LeverResult<Position>
    where
        M: LendingPool + PriceOracle + TokenLedger + ?Sized,
    {
        Position::load(market, user, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine, fund, market, par, pegged, usdc, user, wnative};
    use looper_chain::{
        MemoryPool, PoolError, PoolResult, ReserveData, Transactional, UserAccountData,
        NATIVE_TOKEN,
    };
    use std::sync::Arc;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn leverager() -> Leverager {
        Leverager::new(engine(), UnwindConfig::default())
    }

    fn usdc_loop(principal: u64, ratio: u16, count: u32) -> LoopConfig {
        LoopConfig {
            asset: usdc().asset,
            principal: u(principal),
            rate_mode: RateMode::Variable,
            borrow_ratio: ratio,
            iteration_count: count,
        }
    }

    /// User holding `principal` USDC with every authorization the engine needs.
    fn authorized(pool: &mut MemoryPool, principal: u64) {
        authorized_on(pool, &usdc(), principal);
    }

    fn authorized_on(pool: &mut MemoryPool, r: &ReserveData, principal: u64) {
        pool.mint(user(), r.asset, u(principal)).unwrap();
        pool.approve(r.asset, user(), engine(), U256::MAX).unwrap();
        pool.approve_delegation(r.variable_debt_token, user(), engine(), U256::MAX)
            .unwrap();
        pool.approve(r.collateral_token, user(), engine(), U256::MAX)
            .unwrap();
    }

    /// Every balance a test cares about, for before/after comparisons.
    fn ledger_view(pool: &MemoryPool) -> Vec<U256> {
        let mut view = Vec::new();
        for r in [usdc(), wnative()] {
            for holder in [user(), engine(), pool.address()] {
                for token in [
                    r.asset,
                    r.collateral_token,
                    r.stable_debt_token,
                    r.variable_debt_token,
                ] {
                    view.push(pool.balance_of(token, holder));
                }
            }
        }
        view.push(pool.balance_of(NATIVE_TOKEN, user()));
        view
    }

    #[test]
    fn test_loop_scenario() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        let lev = leverager();

        let outcome = lev.loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10)).unwrap();

        assert_eq!(outcome.amounts.len(), 10);
        let position = lev.position(&pool, user(), usdc().asset).unwrap();
        assert_eq!(position.collateral, u(4455));
        assert_eq!(position.variable_debt, u(3455));
        assert_eq!(position.collateral - position.debt(), u(1000));
        assert_eq!(pool.balance_of(usdc().asset, user()), U256::ZERO);
    }

    #[test]
    fn test_invalid_parameters_touch_nothing() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        let lev = leverager();
        let before = ledger_view(&pool);

        for count in [1, 41] {
            assert_eq!(
                lev.loop_asset(&mut pool, user(), &usdc_loop(1000, 5000, count)),
                Err(LeverError::InvalidIterationCount(count))
            );
        }
        // iteration count wins even for an unknown asset
        let mut unknown = usdc_loop(1000, 5000, 0);
        unknown.asset = Address::with_last_byte(77);
        assert_eq!(
            lev.loop_asset(&mut pool, user(), &unknown),
            Err(LeverError::InvalidIterationCount(0))
        );
        for ratio in [0, 8001] {
            assert!(matches!(
                lev.loop_asset(&mut pool, user(), &usdc_loop(1000, ratio, 10)),
                Err(LeverError::InvalidBorrowRatio { .. })
            ));
        }
        assert_eq!(ledger_view(&pool), before);
    }

    #[test]
    fn test_missing_token_allowance() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        pool.approve(usdc().asset, user(), engine(), u(999)).unwrap();
        let before = ledger_view(&pool);

        let err = leverager()
            .loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10))
            .unwrap_err();
        assert!(matches!(
            err,
            LeverError::InsufficientAllowance(PoolError::InsufficientAllowance { .. })
        ));
        assert_eq!(ledger_view(&pool), before);
    }

    #[test]
    fn test_short_delegation_rolls_back_every_round() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        // covers the first three borrows (800 + 640 + 512) but not the fourth
        pool.approve_delegation(usdc().variable_debt_token, user(), engine(), u(2000))
            .unwrap();
        let before = ledger_view(&pool);

        let err = leverager()
            .loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10))
            .unwrap_err();
        assert!(matches!(
            err,
            LeverError::InsufficientAllowance(PoolError::InsufficientDelegation { .. })
        ));
        assert_eq!(ledger_view(&pool), before);
        assert_eq!(
            pool.borrow_allowance(usdc().variable_debt_token, user(), engine()),
            u(2000)
        );
    }

    #[test]
    fn test_loop_then_close() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        let lev = leverager();
        lev.loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10)).unwrap();

        let outcome = lev.close(&mut pool, user(), usdc().asset).unwrap();

        let position = lev.position(&pool, user(), usdc().asset).unwrap();
        assert!(!position.has_debt());
        assert_eq!(position.collateral, u(1000));
        assert_eq!(outcome.total_repaid, u(3455));
        assert_eq!(pool.balance_of(usdc().asset, engine()), U256::ZERO);

        // a second close is a no-op
        let before = ledger_view(&pool);
        assert!(lev.close(&mut pool, user(), usdc().asset).unwrap().is_noop());
        assert_eq!(ledger_view(&pool), before);
    }

    #[test]
    fn test_close_at_max_ratio_and_depth() {
        let mut pool = market();
        authorized(&mut pool, 1_000_000);
        let lev = leverager();
        lev.loop_asset(&mut pool, user(), &usdc_loop(1_000_000, 8000, 40)).unwrap();

        lev.close(&mut pool, user(), usdc().asset).unwrap();
        assert!(!lev.position(&pool, user(), usdc().asset).unwrap().has_debt());
    }

    /// Truncated series sum, worked out independently of the engine.
    fn series_sum(principal: u64, ratio: u16, count: u32) -> u64 {
        let mut amount = principal;
        let mut sum = 0;
        for _ in 0..count {
            if amount == 0 {
                break;
            }
            sum += amount;
            amount = amount * u64::from(ratio) / 10_000;
        }
        sum
    }

    /// Reserves with different LTV/threshold spreads, each with ratios from
    /// the smallest up to its LTV.
    fn sweep() -> [(ReserveData, [u16; 3]); 3] {
        [
            (usdc(), [1, 5000, 8000]),
            (pegged(), [1, 4500, 9000]),
            (par(), [1, 5000, 10_000]),
        ]
    }

    fn looped_on(
        r: &ReserveData,
        principal: u64,
        ratio: u16,
        count: u32,
    ) -> (MemoryPool, LoopOutcome) {
        let mut pool = market();
        authorized_on(&mut pool, r, principal);
        let config = LoopConfig {
            asset: r.asset,
            principal: u(principal),
            rate_mode: RateMode::Variable,
            borrow_ratio: ratio,
            iteration_count: count,
        };
        let outcome = leverager()
            .loop_asset(&mut pool, user(), &config)
            .unwrap_or_else(|e| panic!("loop {principal}/{ratio}/{count}: {e}"));
        (pool, outcome)
    }

    #[test]
    fn test_loop_and_close_hold_for_every_config() {
        let lev = leverager();
        for (r, ratios) in sweep() {
            for principal in [1u64, 7, 1000, 1_000_000] {
                for ratio in ratios {
                    for count in [2u32, 3, 10, 40] {
                        let label = format!("{principal}/{ratio}/{count} ltv {}", r.ltv);
                        let (mut pool, outcome) = looped_on(&r, principal, ratio, count);

                        let sum = u(series_sum(principal, ratio, count));
                        let position = lev.position(&pool, user(), r.asset).unwrap();
                        assert_eq!(outcome.total_deposited, sum, "{label}");
                        assert_eq!(position.collateral, sum, "{label}");
                        assert_eq!(position.debt(), sum - u(principal), "{label}");

                        let closed = lev
                            .close(&mut pool, user(), r.asset)
                            .unwrap_or_else(|e| panic!("close {label}: {e}"));
                        let position = lev.position(&pool, user(), r.asset).unwrap();
                        assert!(!position.has_debt(), "{label}");
                        assert_eq!(position.collateral, u(principal), "{label}");
                        assert_eq!(closed.total_repaid, sum - u(principal), "{label}");
                        assert_eq!(
                            closed.total_withdrawn,
                            closed.total_repaid + closed.residual_redeposited,
                            "{label}"
                        );
                        assert!(closed.steps <= lev.unwind.max_steps, "{label}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_close_never_raises_debt() {
        let lev = leverager();
        for (r, ratios) in sweep() {
            for principal in [7u64, 1000, 1_000_000] {
                let ratio = ratios[2];
                let (mut pool, _) = looped_on(&r, principal, ratio, 40);
                let mut debt = pool.balance_of(r.variable_debt_token, user());

                // one unwind round at a time, outside any transaction
                let mut rounds = 0;
                while !debt.is_zero() {
                    match unwind_engine::close(&mut pool, lev.address(), user(), r.asset, 1) {
                        Ok(_) | Err(LeverError::UnwindStuck { steps: 1, .. }) => {}
                        Err(e) => panic!("{principal}/{ratio} ltv {}: {e}", r.ltv),
                    }
                    let now = pool.balance_of(r.variable_debt_token, user());
                    assert!(now < debt, "{principal}/{ratio} ltv {}", r.ltv);
                    debt = now;
                    rounds += 1;
                    assert!(rounds <= lev.unwind.max_steps);
                }
                assert_eq!(
                    pool.balance_of(r.collateral_token, user()),
                    u(principal)
                );
            }
        }
    }

    #[test]
    fn test_zero_principal_is_refused() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        let lev = leverager();
        let before = ledger_view(&pool);

        assert_eq!(
            lev.loop_asset(&mut pool, user(), &usdc_loop(0, 8000, 10)),
            Err(LeverError::PoolRejection(PoolError::ZeroAmount))
        );
        assert_eq!(
            lev.loop_native(&mut pool, user(), U256::ZERO, RateMode::Variable, 7000, 3),
            Err(LeverError::PoolRejection(PoolError::ZeroAmount))
        );
        assert_eq!(ledger_view(&pool), before);
    }

    #[test]
    fn test_price_collapse_leaves_close_stuck() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        let lev = leverager();
        lev.loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10)).unwrap();

        // extra wrapped-native collateral lets the user borrow past the loop
        fund(&mut pool, wnative().asset, user(), 1);
        pool.deposit(user(), wnative().asset, u(1), user()).unwrap();
        pool.borrow(user(), usdc().asset, u(1000), RateMode::Variable, user())
            .unwrap();
        pool.prices().set_price(wnative().asset, u(1));

        let before = ledger_view(&pool);
        let err = lev.close(&mut pool, user(), usdc().asset).unwrap_err();
        assert!(matches!(err, LeverError::UnwindStuck { steps: 0, .. }));
        assert_eq!(ledger_view(&pool), before);
    }

    #[test]
    fn test_health_queries_match_pool() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        let lev = leverager();
        lev.loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10)).unwrap();

        let pool_hf = pool.get_user_account_data(user()).unwrap().health_factor;
        assert_eq!(
            lev.health_factor(&pool, user(), usdc().asset, U256::ZERO).unwrap(),
            pool_hf
        );

        let snapshot = lev.withdrawable(&pool, user(), usdc().asset).unwrap();
        assert!(snapshot.withdraw_amount <= pool.balance_of(usdc().collateral_token, user()));
        assert!(!snapshot.withdraw_amount.is_zero());
        assert_eq!(lev.ltv(&pool, usdc().asset).unwrap(), 8000);
    }

    #[test]
    fn test_native_loop() {
        let mut pool = market();
        let w = wnative();
        pool.mint(user(), NATIVE_TOKEN, u(100)).unwrap();
        pool.approve_delegation(w.variable_debt_token, user(), engine(), U256::MAX)
            .unwrap();

        let outcome = leverager()
            .loop_native(&mut pool, user(), u(100), RateMode::Variable, 7000, 3)
            .unwrap();

        // 100 + 70 + 49
        assert_eq!(outcome.total_deposited, u(219));
        assert_eq!(outcome.asset, w.asset);
        assert_eq!(pool.balance_of(NATIVE_TOKEN, user()), U256::ZERO);
        assert_eq!(pool.balance_of(w.collateral_token, user()), u(219));
        assert_eq!(pool.balance_of(w.variable_debt_token, user()), u(119));
        assert_eq!(pool.balance_of(w.asset, engine()), U256::ZERO);
    }

    #[test]
    fn test_native_loop_ratio_bounded_by_wrapped_ltv() {
        let mut pool = market();
        pool.mint(user(), NATIVE_TOKEN, u(100)).unwrap();
        let err = leverager()
            .loop_native(&mut pool, user(), u(100), RateMode::Variable, 7001, 3)
            .unwrap_err();
        assert_eq!(err, LeverError::InvalidBorrowRatio { ratio: 7001, ltv: 7000 });
    }

    #[test]
    fn test_open_transaction_is_reported_as_reentrancy() {
        let mut pool = market();
        authorized(&mut pool, 1000);
        pool.begin().unwrap();

        let err = leverager()
            .loop_asset(&mut pool, user(), &usdc_loop(1000, 8000, 10))
            .unwrap_err();
        assert_eq!(err, LeverError::ReentrantCall);
    }

    /// Market that calls back into the leverager from inside a deposit.
    struct ReentrantMarket {
        inner: MemoryPool,
        leverager: Arc<Leverager>,
        spare: MemoryPool,
        nested: Option<LeverResult<UnwindOutcome>>,
    }

    impl LendingPool for ReentrantMarket {
        fn address(&self) -> Address {
            self.inner.address()
        }
        fn deposit(
            &mut self,
            sender: Address,
            asset: Address,
            amount: U256,
            on_behalf_of: Address,
        ) -> PoolResult<()> {
            if self.nested.is_none() {
                let lev = self.leverager.clone();
                self.nested = Some(lev.close(&mut self.spare, on_behalf_of, asset));
            }
            self.inner.deposit(sender, asset, amount, on_behalf_of)
        }
        fn borrow(
            &mut self,
            sender: Address,
            asset: Address,
            amount: U256,
            rate_mode: RateMode,
            on_behalf_of: Address,
        ) -> PoolResult<()> {
            self.inner.borrow(sender, asset, amount, rate_mode, on_behalf_of)
        }
        fn repay(
            &mut self,
            sender: Address,
            asset: Address,
            amount: U256,
            rate_mode: RateMode,
            on_behalf_of: Address,
        ) -> PoolResult<U256> {
            self.inner.repay(sender, asset, amount, rate_mode, on_behalf_of)
        }
        fn withdraw(
            &mut self,
            sender: Address,
            asset: Address,
            amount: U256,
            to: Address,
        ) -> PoolResult<U256> {
            self.inner.withdraw(sender, asset, amount, to)
        }
        fn get_user_account_data(&self, user: Address) -> PoolResult<UserAccountData> {
            self.inner.get_user_account_data(user)
        }
        fn get_reserve_data(&self, asset: Address) -> PoolResult<ReserveData> {
            self.inner.get_reserve_data(asset)
        }
    }

    impl PriceOracle for ReentrantMarket {
        fn get_asset_price(&self, asset: Address) -> PoolResult<U256> {
            self.inner.get_asset_price(asset)
        }
    }

    impl TokenLedger for ReentrantMarket {
        fn balance_of(&self, token: Address, holder: Address) -> U256 {
            self.inner.balance_of(token, holder)
        }
        fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
            self.inner.allowance(token, owner, spender)
        }
        fn approve(
            &mut self,
            token: Address,
            owner: Address,
            spender: Address,
            amount: U256,
        ) -> PoolResult<()> {
            self.inner.approve(token, owner, spender, amount)
        }
        fn transfer(
            &mut self,
            token: Address,
            owner: Address,
            to: Address,
            amount: U256,
        ) -> PoolResult<()> {
            self.inner.transfer(token, owner, to, amount)
        }
        fn transfer_from(
            &mut self,
            token: Address,
            spender: Address,
            from: Address,
            to: Address,
            amount: U256,
        ) -> PoolResult<()> {
            self.inner.transfer_from(token, spender, from, to, amount)
        }
        fn borrow_allowance(
            &self,
            debt_token: Address,
            delegator: Address,
            delegatee: Address,
        ) -> U256 {
            self.inner.borrow_allowance(debt_token, delegator, delegatee)
        }
        fn approve_delegation(
            &mut self,
            debt_token: Address,
            delegator: Address,
            delegatee: Address,
            amount: U256,
        ) -> PoolResult<()> {
            self.inner.approve_delegation(debt_token, delegator, delegatee, amount)
        }
        fn wrapped_native(&self) -> Address {
            self.inner.wrapped_native()
        }
        fn wrap_native(&mut self, holder: Address, amount: U256) -> PoolResult<()> {
            self.inner.wrap_native(holder, amount)
        }
        fn unwrap_native(&mut self, holder: Address, amount: U256) -> PoolResult<()> {
            self.inner.unwrap_native(holder, amount)
        }
    }

    impl Transactional for ReentrantMarket {
        fn begin(&mut self) -> PoolResult<()> {
            self.inner.begin()
        }
        fn commit(&mut self) -> PoolResult<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) {
            self.inner.rollback()
        }
    }

    #[test]
    fn test_nested_call_is_refused() {
        let mut inner = market();
        authorized(&mut inner, 1000);
        let lev = Arc::new(leverager());
        let mut wrapped = ReentrantMarket {
            inner,
            leverager: lev.clone(),
            spare: market(),
            nested: None,
        };

        let outcome = lev
            .loop_asset(&mut wrapped, user(), &usdc_loop(1000, 8000, 10))
            .unwrap();

        assert_eq!(wrapped.nested, Some(Err(LeverError::ReentrantCall)));
        assert_eq!(outcome.total_deposited, u(4455));
        // the outer loop was not disturbed
        assert_eq!(
            wrapped.inner.balance_of(usdc().variable_debt_token, user()),
            u(3455)
        );
    }
}
