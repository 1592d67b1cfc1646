//! Loop parameter validation, run before any market call.

use looper_chain::RateMode;

use crate::errors::{LeverError, LeverResult};

/// Fewest deposit rounds a loop may run (principal plus one borrow).
pub const MIN_ITERATIONS: u32 = 2;

/// Most deposit rounds a loop may run.
pub const MAX_ITERATIONS: u32 = 40;

/// Check loop parameters against the asset's configured LTV.
///
/// The iteration count is checked first and independently of the other
/// arguments.
pub fn validate(
    _rate_mode: RateMode,
    borrow_ratio: u16,
    asset_ltv: u16,
    iteration_count: u32,
) -> LeverResult<()> {
    validate_iteration_count(iteration_count)?;
    if borrow_ratio == 0 || borrow_ratio > asset_ltv {
        return Err(LeverError::InvalidBorrowRatio {
            ratio: borrow_ratio,
            ltv: asset_ltv,
        });
    }
    Ok(())
}

/// Check the iteration count alone. Callers run this before reading the
/// asset's LTV so a bad count is reported whatever the asset.
pub fn validate_iteration_count(iteration_count: u32) -> LeverResult<()> {
    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iteration_count) {
        return Err(LeverError::InvalidIterationCount(iteration_count));
    }
    Ok(())
}

/// Parse a rate mode from its config name or pool code (`stable`/`1`, `variable`/`2`).
pub fn parse_rate_mode(value: &str) -> LeverResult<RateMode> {
    value.parse().map_err(LeverError::InvalidRateMode)
}
