//! Market interaction layer for the looper.
//!
//! This crate provides:
//! - Collaborator traits for the lending pool, price oracle and token ledger
//! - A keyed balance ledger with staged, all-or-nothing transactions
//! - An in-memory Aave-style lending pool implementing every collaborator
//! - U256 fixed-point helpers (WAD values, basis points, 8-decimal prices)

mod errors;
pub mod ledger;
pub mod oracle;
pub mod protocol;
pub mod u256_math;

pub use errors::{PoolError, PoolResult};
pub use ledger::Ledger;
pub use oracle::PriceBook;
pub use protocol::{
    atomically, LendingPool, Market, MemoryPool, PriceOracle, RateMode, ReserveData, TokenLedger,
    Transactional, UserAccountData, NATIVE_TOKEN,
};
