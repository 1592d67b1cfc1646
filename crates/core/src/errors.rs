//! Error taxonomy of the leverage engines.

use alloy::primitives::{Address, U256};
use looper_chain::PoolError;
use thiserror::Error;

/// Why a loop, close or query was refused.
///
/// Parameter errors are raised before the market is touched. Everything
/// else aborts the enclosing transaction, so no variant ever leaves partial
/// effects behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeverError {
    #[error("iteration count {0} outside [2, 40]")]
    InvalidIterationCount(u32),

    #[error("borrow ratio {ratio} bps must be in (0, {ltv}]")]
    InvalidBorrowRatio { ratio: u16, ltv: u16 },

    #[error("invalid rate mode: {0}")]
    InvalidRateMode(String),

    /// A token approval, collateral-receipt approval or borrow delegation
    /// does not cover the operation.
    #[error("insufficient allowance: {0}")]
    InsufficientAllowance(PoolError),

    #[error("pool rejected the operation: {0}")]
    PoolRejection(PoolError),

    #[error("unwind stuck for {user} on {asset} after {steps} steps with {remaining_debt} debt left")]
    UnwindStuck {
        user: Address,
        asset: Address,
        steps: u32,
        remaining_debt: U256,
    },

    #[error("re-entrant call while another operation is in flight")]
    ReentrantCall,
}

impl From<PoolError> for LeverError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::TransactionOpen => Self::ReentrantCall,
            e if e.is_allowance() => Self::InsufficientAllowance(e),
            e => Self::PoolRejection(e),
        }
    }
}

pub type LeverResult<T> = Result<T, LeverError>;
