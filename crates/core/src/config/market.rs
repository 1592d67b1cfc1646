//! Market description loaded from TOML: pool identity, reserves with their
//! instruments, prices and seed liquidity, plus the demo account.

use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use looper_chain::u256_math::{pow10, MAX_BPS};
use looper_chain::{LendingPool, MemoryPool, RateMode, ReserveData, TokenLedger};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::settings::LoopDefaults;
use crate::loop_engine::LoopConfig;
use crate::validator::parse_rate_mode;

/// Market configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub pool: PoolSection,
    pub reserves: Vec<ReserveConfig>,
    #[serde(default)]
    pub demo: Option<DemoConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    /// Pool account address
    pub address: String,
    /// Wrapped-native token address
    pub wrapped_native: String,
    /// Account that supplies the seed liquidity
    pub liquidity_provider: String,
}

/// One reserve (TOML-loadable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveConfig {
    /// Asset symbol (e.g., "USDT")
    pub symbol: String,
    pub asset: String,
    pub collateral_token: String,
    pub stable_debt_token: String,
    pub variable_debt_token: String,
    pub decimals: u8,
    pub ltv_bps: u16,
    pub liquidation_threshold_bps: u16,
    #[serde(default = "default_true")]
    pub borrowing_enabled: bool,
    /// Oracle price in USD
    pub price_usd: f64,
    /// Seed liquidity in whole tokens
    #[serde(default)]
    pub liquidity: u64,
}

fn default_true() -> bool {
    true
}

/// Demo account and the loop it runs. Missing loop parameters fall back to
/// the active profile's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    pub user: String,
    pub engine: String,
    /// Reserve symbol to loop
    pub asset: String,
    /// Principal in whole tokens
    pub principal: u64,
    #[serde(default)]
    pub rate_mode: Option<String>,
    #[serde(default)]
    pub borrow_ratio_bps: Option<u16>,
    #[serde(default)]
    pub iteration_count: Option<u32>,
}

impl ReserveConfig {
    pub fn reserve_data(&self) -> Result<ReserveData> {
        if self.ltv_bps > MAX_BPS || self.liquidation_threshold_bps > MAX_BPS {
            bail!("Reserve {} has a ratio above 10000 bps", self.symbol);
        }
        Ok(ReserveData {
            asset: parse_address(&self.asset)?,
            collateral_token: parse_address(&self.collateral_token)?,
            stable_debt_token: parse_address(&self.stable_debt_token)?,
            variable_debt_token: parse_address(&self.variable_debt_token)?,
            decimals: self.decimals,
            ltv: self.ltv_bps,
            liquidation_threshold: self.liquidation_threshold_bps,
            borrowing_enabled: self.borrowing_enabled,
        })
    }

    /// Price with 8 decimals.
    pub fn price(&self) -> Result<U256> {
        if !self.price_usd.is_finite() || self.price_usd <= 0.0 {
            bail!("Reserve {} has invalid price {}", self.symbol, self.price_usd);
        }
        Ok(U256::from((self.price_usd * 1e8).round() as u128))
    }

    /// Convert whole tokens to base units.
    pub fn units(&self, whole: u64) -> U256 {
        U256::from(whole) * pow10(self.decimals)
    }
}

impl MarketConfig {
    /// Load market config from a TOML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read market config {:?}", path))?;
        let config: MarketConfig = toml::from_str(&expand_env(&content))
            .with_context(|| format!("Failed to parse market config {:?}", path))?;
        Ok(config)
    }

    /// Load `${CONFIG_DIR}/market.toml` (default `./config`).
    pub fn from_env() -> Result<Self> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "./config".to_string());
        Self::from_file(Path::new(&config_dir).join("market.toml"))
    }

    pub fn reserve(&self, symbol: &str) -> Option<&ReserveConfig> {
        self.reserves
            .iter()
            .find(|r| r.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Build an in-memory pool: register reserves, publish prices and
    /// deposit the seed liquidity.
    pub fn build_pool(&self) -> Result<MemoryPool> {
        let address = parse_address(&self.pool.address)?;
        let provider = parse_address(&self.pool.liquidity_provider)?;
        let mut pool = MemoryPool::new(address, parse_address(&self.pool.wrapped_native)?);

        for reserve in &self.reserves {
            let data = reserve.reserve_data()?;
            let asset = data.asset;
            pool.init_reserve(data)
                .with_context(|| format!("Failed to register reserve {}", reserve.symbol))?;
            pool.prices().set_price(asset, reserve.price()?);

            if reserve.liquidity > 0 {
                let amount = reserve.units(reserve.liquidity);
                pool.mint(provider, asset, amount)?;
                pool.approve(asset, provider, address, amount)?;
                pool.deposit(provider, asset, amount, provider)
                    .with_context(|| format!("Failed to seed {} liquidity", reserve.symbol))?;
            }

            info!(
                symbol = %reserve.symbol,
                asset = %asset,
                ltv_bps = reserve.ltv_bps,
                liquidation_threshold_bps = reserve.liquidation_threshold_bps,
                liquidity = reserve.liquidity,
                "Reserve configured"
            );
        }
        Ok(pool)
    }
}

impl DemoConfig {
    pub fn user_address(&self) -> Result<Address> {
        parse_address(&self.user)
    }

    pub fn engine_address(&self) -> Result<Address> {
        parse_address(&self.engine)
    }

    /// Resolve the demo loop against the market, filling gaps from `defaults`.
    pub fn loop_config(
        &self,
        market: &MarketConfig,
        defaults: &LoopDefaults,
    ) -> Result<LoopConfig> {
        let reserve = market
            .reserve(&self.asset)
            .ok_or_else(|| anyhow::anyhow!("Unknown demo asset '{}'", self.asset))?;
        let rate_mode: RateMode = parse_rate_mode(
            self.rate_mode.as_deref().unwrap_or(&defaults.rate_mode),
        )?;

        Ok(LoopConfig {
            asset: parse_address(&reserve.asset)?,
            principal: reserve.units(self.principal),
            rate_mode,
            borrow_ratio: self.borrow_ratio_bps.unwrap_or(defaults.borrow_ratio_bps),
            iteration_count: self.iteration_count.unwrap_or(defaults.iteration_count),
        })
    }
}

fn parse_address(s: &str) -> Result<Address> {
    s.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
}

/// Expand ${VAR_NAME} patterns with environment variable values.
/// Unset variables are left as written.
fn expand_env(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    re.replace_all(s, |caps: &regex_lite::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
