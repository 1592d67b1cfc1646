//! In-process price book backing the memory pool's oracle.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use tracing::debug;

use crate::errors::{PoolError, PoolResult};
use crate::protocol::PriceOracle;

/// Asset prices (8 decimals), updatable through a shared reference so a
/// feed can move prices while the pool is borrowed elsewhere.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: DashMap<Address, U256>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the price of an asset.
    pub fn set_price(&self, asset: Address, price: U256) {
        let previous = self.prices.insert(asset, price);
        debug!(asset = %asset, price = %price, previous = ?previous, "Price updated");
    }

    pub fn price(&self, asset: Address) -> Option<U256> {
        self.prices.get(&asset).map(|p| *p)
    }
}

impl PriceOracle for PriceBook {
    fn get_asset_price(&self, asset: Address) -> PoolResult<U256> {
        match self.price(asset) {
            Some(price) if !price.is_zero() => Ok(price),
            _ => Err(PoolError::MissingPrice(asset)),
        }
    }
}
