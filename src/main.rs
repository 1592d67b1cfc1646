//! Looper demo runner
//!
//! Seeds an in-memory Aave-style market from `config/market.toml`, loops the
//! demo account's principal, logs the leveraged position, closes it again
//! and prints a JSON summary of both legs.
//!
//! Environment:
//! - `LOOPER_PROFILE` / `LOOPER_CONFIG`: runtime settings
//! - `CONFIG_DIR`: directory holding `market.toml` (default `./config`)
//! - `LOG_FORMAT=json`: structured log output
//! - `RUST_LOG`: log filter

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use looper_chain::{LendingPool, MemoryPool, RateMode, TokenLedger};
use looper_core::u256_math::wad_to_f64;
use looper_core::{
    Leverager, LoopConfig, LoopOutcome, LooperConfig, MarketConfig, Position,
    UnwindOutcome,
};

fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let settings = LooperConfig::load()?;
    settings.log_config();

    let market = MarketConfig::from_env()?;
    let demo = market
        .demo
        .clone()
        .context("market config has no [demo] section")?;
    let mut pool = market.build_pool()?;

    let user = demo.user_address()?;
    let engine = demo.engine_address()?;
    let loop_config = demo.loop_config(&market, &settings.looping)?;

    seed_account(&mut pool, user, engine, &loop_config)?;

    let leverager = Leverager::new(engine, settings.unwind);

    let looped = leverager.loop_asset(&mut pool, user, &loop_config)?;
    let after_loop = leverager.position(&pool, user, loop_config.asset)?;
    let snapshot = leverager.withdrawable(&pool, user, loop_config.asset)?;
    info!(
        collateral = %after_loop.collateral,
        debt = %after_loop.debt(),
        health_factor = after_loop.health_factor_f64(),
        withdrawable = %snapshot.withdraw_amount,
        afford_usd = wad_to_f64(snapshot.afford),
        "Leveraged position"
    );

    let closed = leverager.close(&mut pool, user, loop_config.asset)?;
    let after_close = leverager.position(&pool, user, loop_config.asset)?;
    info!(
        collateral = %after_close.collateral,
        debt = %after_close.debt(),
        "Position after close"
    );

    let summary = Summary::new(
        &settings,
        &loop_config,
        &looped,
        &after_loop,
        &closed,
        &after_close,
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,looper_core=debug,looper_chain=info")),
        )
        .init();
}

/// Give the demo user its principal and every authorization the engine
/// needs for both the loop and the close.
fn seed_account(
    pool: &mut MemoryPool,
    user: Address,
    engine: Address,
    config: &LoopConfig,
) -> Result<()> {
    let reserve = pool.get_reserve_data(config.asset)?;

    pool.mint(user, config.asset, config.principal)?;
    pool.approve(config.asset, user, engine, config.principal)?;
    pool.approve_delegation(reserve.debt_token(config.rate_mode), user, engine, U256::MAX)?;
    pool.approve(reserve.collateral_token, user, engine, U256::MAX)?;

    info!(
        user = %user,
        engine = %engine,
        asset = %config.asset,
        principal = %config.principal,
        "Demo account seeded"
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct Summary {
    generated_at: DateTime<Utc>,
    profile: String,
    asset: Address,
    rate_mode: RateMode,
    borrow_ratio_bps: u16,
    iteration_count: u32,
    principal: String,
    amounts: Vec<String>,
    looped: PositionSummary,
    close: UnwindOutcome,
    closed: PositionSummary,
}

#[derive(Debug, Serialize)]
struct PositionSummary {
    collateral: String,
    debt: String,
    health_factor: f64,
}

impl From<&Position> for PositionSummary {
    fn from(position: &Position) -> Self {
        Self {
            collateral: position.collateral.to_string(),
            debt: position.debt().to_string(),
            health_factor: position.health_factor_f64(),
        }
    }
}

impl Summary {
    fn new(
        settings: &LooperConfig,
        config: &LoopConfig,
        looped: &LoopOutcome,
        after_loop: &Position,
        closed: &UnwindOutcome,
        after_close: &Position,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            profile: settings.profile.clone(),
            asset: config.asset,
            rate_mode: config.rate_mode,
            borrow_ratio_bps: config.borrow_ratio,
            iteration_count: config.iteration_count,
            principal: config.principal.to_string(),
            amounts: looped.amounts.iter().map(U256::to_string).collect(),
            looped: after_loop.into(),
            close: *closed,
            closed: after_close.into(),
        }
    }
}
