//! Refusals raised by the lending pool, its token ledger and its oracle.

use alloy::primitives::{Address, U256};
use thiserror::Error;

/// Every reason the market can refuse a call.
///
/// The leverage engines propagate these verbatim; a refusal anywhere inside
/// a transaction discards all of its staged effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("reserve {0} is not initialized")]
    UnknownReserve(Address),

    #[error("reserve {0} is already initialized")]
    ReserveAlreadyInitialized(Address),

    #[error("invalid reserve configuration for {asset}: {reason}")]
    InvalidReserveConfig { asset: Address, reason: String },

    #[error("borrowing is disabled on reserve {0}")]
    BorrowingDisabled(Address),

    #[error("no price available for {0}")]
    MissingPrice(Address),

    #[error("{holder} holds {available} of {token}, needs {required}")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        required: U256,
        available: U256,
    },

    #[error("allowance of {spender} on {token} from {owner} is {available}, needs {required}")]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
        available: U256,
    },

    #[error("borrow allowance of {delegatee} on {debt_token} from {delegator} is {available}, needs {required}")]
    InsufficientDelegation {
        debt_token: Address,
        delegator: Address,
        delegatee: Address,
        required: U256,
        available: U256,
    },

    #[error("pool holds {available} of {asset}, cannot release {required}")]
    InsufficientLiquidity {
        asset: Address,
        required: U256,
        available: U256,
    },

    #[error("no collateral to borrow against")]
    CollateralBalanceZero,

    #[error("borrow of {requested} exceeds remaining capacity {available} (base units)")]
    BorrowCapacityExceeded { requested: U256, available: U256 },

    #[error("health factor would drop to {health_factor} (WAD), below 1.0")]
    HealthFactorTooLow { health_factor: U256 },

    #[error("{user} has no {debt_token} debt to repay")]
    NoDebtOfSelectedType { user: Address, debt_token: Address },

    #[error("debt instrument {0} is not transferable")]
    NonTransferable(Address),

    #[error("{0} is not a debt instrument")]
    NotDebtInstrument(Address),

    #[error("balance overflow on {0}")]
    Overflow(Address),

    #[error("a transaction is already open")]
    TransactionOpen,

    #[error("no transaction is open")]
    NoTransaction,
}

impl PoolError {
    /// True for refusals caused by a missing token approval or borrow
    /// delegation rather than by the pool's solvency rules.
    pub fn is_allowance(&self) -> bool {
        matches!(
            self,
            Self::InsufficientAllowance { .. } | Self::InsufficientDelegation { .. }
        )
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
