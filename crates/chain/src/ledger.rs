//! Keyed balance ledger with a staged transaction overlay.
//!
//! Balances live in an explicit `(holder, token) -> amount` store, next to
//! `(owner, spender, token)` allowance and borrow-delegation stores. While a
//! transaction is open every write lands in an overlay; reads see the overlay
//! first. `commit` folds the overlay into the committed store, `rollback`
//! drops it. Writes outside a transaction apply directly.

use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use tracing::trace;

use crate::errors::{PoolError, PoolResult};

type BalanceKey = (Address, Address);
type AllowanceKey = (Address, Address, Address);

/// One layer of ledger state: either the committed store or an overlay.
#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<BalanceKey, U256>,
    allowances: HashMap<AllowanceKey, U256>,
    delegations: HashMap<AllowanceKey, U256>,
}

impl LedgerState {
    fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.allowances.is_empty() && self.delegations.is_empty()
    }

    fn absorb(&mut self, overlay: LedgerState) {
        self.balances.extend(overlay.balances);
        self.allowances.extend(overlay.allowances);
        self.delegations.extend(overlay.delegations);
    }
}

/// Balance ledger shared by every account in a market.
#[derive(Debug, Default)]
pub struct Ledger {
    committed: LedgerState,
    staged: Option<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction. Only one may be open at a time.
    pub fn begin(&mut self) -> PoolResult<()> {
        if self.staged.is_some() {
            return Err(PoolError::TransactionOpen);
        }
        self.staged = Some(LedgerState::default());
        Ok(())
    }

    /// Publish every staged write.
    pub fn commit(&mut self) -> PoolResult<()> {
        let overlay = self.staged.take().ok_or(PoolError::NoTransaction)?;
        trace!(
            balances = overlay.balances.len(),
            allowances = overlay.allowances.len(),
            delegations = overlay.delegations.len(),
            "Committing ledger overlay"
        );
        self.committed.absorb(overlay);
        Ok(())
    }

    /// Discard every staged write. No-op when no transaction is open.
    pub fn rollback(&mut self) {
        if let Some(overlay) = self.staged.take() {
            if !overlay.is_empty() {
                trace!(
                    balances = overlay.balances.len(),
                    "Discarding ledger overlay"
                );
            }
        }
    }

    fn write_layer(&mut self) -> &mut LedgerState {
        match self.staged {
            Some(ref mut overlay) => overlay,
            None => &mut self.committed,
        }
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    pub fn balance(&self, holder: Address, token: Address) -> U256 {
        let key = (holder, token);
        self.staged
            .as_ref()
            .and_then(|s| s.balances.get(&key))
            .or_else(|| self.committed.balances.get(&key))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn set_balance(&mut self, holder: Address, token: Address, amount: U256) {
        self.write_layer().balances.insert((holder, token), amount);
    }

    /// Mint `amount` of `token` to `holder`.
    pub fn credit(&mut self, holder: Address, token: Address, amount: U256) -> PoolResult<()> {
        let next = self
            .balance(holder, token)
            .checked_add(amount)
            .ok_or(PoolError::Overflow(token))?;
        self.set_balance(holder, token, next);
        Ok(())
    }

    /// Burn `amount` of `token` from `holder`.
    pub fn debit(&mut self, holder: Address, token: Address, amount: U256) -> PoolResult<()> {
        let available = self.balance(holder, token);
        if available < amount {
            return Err(PoolError::InsufficientBalance {
                token,
                holder,
                required: amount,
                available,
            });
        }
        self.set_balance(holder, token, available - amount);
        Ok(())
    }

    pub fn move_balance(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> PoolResult<()> {
        self.debit(from, token, amount)?;
        self.credit(to, token, amount)
    }

    // ------------------------------------------------------------------
    // Allowances
    // ------------------------------------------------------------------

    pub fn allowance(&self, owner: Address, spender: Address, token: Address) -> U256 {
        Self::read_grant(
            &self.committed.allowances,
            self.staged.as_ref().map(|s| &s.allowances),
            (owner, spender, token),
        )
    }

    pub fn set_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        token: Address,
        amount: U256,
    ) {
        self.write_layer()
            .allowances
            .insert((owner, spender, token), amount);
    }

    /// Consume `amount` of the allowance. `U256::MAX` never decreases.
    pub fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        token: Address,
        amount: U256,
    ) -> PoolResult<()> {
        let available = self.allowance(owner, spender, token);
        if available < amount {
            return Err(PoolError::InsufficientAllowance {
                token,
                owner,
                spender,
                required: amount,
                available,
            });
        }
        if available != U256::MAX {
            self.set_allowance(owner, spender, token, available - amount);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Borrow delegation
    // ------------------------------------------------------------------

    pub fn delegation(&self, delegator: Address, delegatee: Address, debt_token: Address) -> U256 {
        Self::read_grant(
            &self.committed.delegations,
            self.staged.as_ref().map(|s| &s.delegations),
            (delegator, delegatee, debt_token),
        )
    }

    pub fn set_delegation(
        &mut self,
        delegator: Address,
        delegatee: Address,
        debt_token: Address,
        amount: U256,
    ) {
        self.write_layer()
            .delegations
            .insert((delegator, delegatee, debt_token), amount);
    }

    /// Consume `amount` of a borrow delegation. `U256::MAX` never decreases.
    pub fn spend_delegation(
        &mut self,
        delegator: Address,
        delegatee: Address,
        debt_token: Address,
        amount: U256,
    ) -> PoolResult<()> {
        let available = self.delegation(delegator, delegatee, debt_token);
        if available < amount {
            return Err(PoolError::InsufficientDelegation {
                debt_token,
                delegator,
                delegatee,
                required: amount,
                available,
            });
        }
        if available != U256::MAX {
            self.set_delegation(delegator, delegatee, debt_token, available - amount);
        }
        Ok(())
    }

    fn read_grant(
        committed: &HashMap<AllowanceKey, U256>,
        staged: Option<&HashMap<AllowanceKey, U256>>,
        key: AllowanceKey,
    ) -> U256 {
        staged
            .and_then(|s| s.get(&key))
            .or_else(|| committed.get(&key))
            .copied()
            .unwrap_or(U256::ZERO)
    }
}
