//! Shared market fixtures for unit tests.

use alloy::primitives::{Address, U256};
use looper_chain::{LendingPool, MemoryPool, ReserveData, TokenLedger};

pub const USD: u64 = 100_000_000;

pub fn pool_address() -> Address {
    Address::repeat_byte(0xAA)
}

pub fn engine() -> Address {
    Address::repeat_byte(0xBB)
}

pub fn user() -> Address {
    Address::repeat_byte(0x01)
}

pub fn liquidity_provider() -> Address {
    Address::repeat_byte(0x0F)
}

/// $1 stablecoin, 80% LTV, 85% liquidation threshold.
pub fn usdc() -> ReserveData {
    reserve(1, 8000, 8500)
}

/// $2000 wrapped native, 70% LTV, 75% liquidation threshold.
pub fn wnative() -> ReserveData {
    reserve(2, 7000, 7500)
}

/// $1 asset with LTV equal to its 90% liquidation threshold.
pub fn pegged() -> ReserveData {
    reserve(3, 9000, 9000)
}

/// $1 asset borrowable up to its full value.
pub fn par() -> ReserveData {
    reserve(4, 10_000, 10_000)
}

fn reserve(id: u8, ltv: u16, liquidation_threshold: u16) -> ReserveData {
    ReserveData {
        asset: Address::with_last_byte(id),
        collateral_token: Address::with_last_byte(id + 100),
        stable_debt_token: Address::with_last_byte(id + 150),
        variable_debt_token: Address::with_last_byte(id + 200),
        decimals: 0,
        ltv,
        liquidation_threshold,
        borrowing_enabled: true,
    }
}

/// Pool with every fixture reserve priced and 1_000_000 units of liquidity
/// in each.
pub fn market() -> MemoryPool {
    let mut pool = MemoryPool::new(pool_address(), wnative().asset);
    let reserves = [
        (usdc(), USD),
        (wnative(), 2000 * USD),
        (pegged(), USD),
        (par(), USD),
    ];
    for (reserve, price) in reserves {
        pool.init_reserve(reserve.clone()).unwrap();
        pool.prices().set_price(reserve.asset, U256::from(price));
        fund(&mut pool, reserve.asset, liquidity_provider(), 1_000_000);
        deposit(&mut pool, reserve.asset, liquidity_provider(), 1_000_000);
    }
    pool
}

/// Mint `amount` to `who` and approve the pool for it.
pub fn fund(pool: &mut MemoryPool, asset: Address, who: Address, amount: u64) {
    pool.mint(who, asset, U256::from(amount)).unwrap();
    pool.approve(asset, who, pool_address(), U256::MAX).unwrap();
}

pub fn deposit(pool: &mut MemoryPool, asset: Address, who: Address, amount: u64) {
    pool.deposit(who, asset, U256::from(amount), who).unwrap();
}
