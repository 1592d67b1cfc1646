//! Configuration for the looper.
//!
//! This module provides:
//! - Runtime settings (profiles, loop defaults, unwind bound)
//! - Market description (reserves, prices, seed liquidity, demo account)

mod market;
mod settings;

pub use market::{DemoConfig, MarketConfig, PoolSection, ReserveConfig};
pub use settings::{LoopDefaults, LooperConfig, UnwindConfig};
