//! Looper core logic.
//!
//! This crate provides the leverage engine:
//! - Parameter validation for loop requests
//! - Health computations (withdrawable capacity, projected health factor)
//! - Forward loop (asset and native-currency variants)
//! - Unwind/close, driving debt to zero within the pool's health bound
//! - The `Leverager` facade: atomic calls and the re-entrancy guard
//! - Runtime and market configuration
//!
//! Works against any market implementing `looper_chain::Market`.

pub mod config;
mod errors;
pub mod health;
mod leverager;
pub mod loop_engine;
mod position;
pub mod unwind_engine;
pub mod validator;

#[cfg(test)]
mod testing;

pub use looper_chain::u256_math;

pub use config::{LooperConfig, MarketConfig, UnwindConfig};
pub use errors::{LeverError, LeverResult};
pub use health::HealthSnapshot;
pub use leverager::Leverager;
pub use loop_engine::{LoopConfig, LoopOutcome};
pub use position::Position;
pub use unwind_engine::UnwindOutcome;
