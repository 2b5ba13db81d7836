//! Spending caps an owner grants to spenders over their secondary asset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ledgerbank_core::{Address, Amount, DomainError, DomainResult};

/// Allowances granted by one owner, keyed by spender.
///
/// A spender that was never approved has an allowance of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceBook {
    granted: BTreeMap<Address, Amount>,
}

impl AllowanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowance_of(&self, spender: &Address) -> Amount {
        self.granted.get(spender).copied().unwrap_or(Amount::ZERO)
    }

    /// Replace the allowance for `spender`.
    ///
    /// This is an overwrite, not a delta: approving 10 after approving 5
    /// leaves 10, not 15.
    pub fn approve(&mut self, spender: Address, amount: Amount) {
        if amount.is_zero() {
            self.granted.remove(&spender);
        } else {
            self.granted.insert(spender, amount);
        }
    }

    /// Remaining allowance after pulling `amount`, without mutating.
    pub fn remaining_after(&self, spender: &Address, amount: Amount) -> DomainResult<Amount> {
        let available = self.allowance_of(spender);
        available
            .checked_sub(amount)
            .ok_or(DomainError::InsufficientAllowance {
                required: amount,
                available,
            })
    }

    /// Pull `amount` from the allowance for `spender`.
    pub fn consume(&mut self, spender: &Address, amount: Amount) -> DomainResult<Amount> {
        let remaining = self.remaining_after(spender, amount)?;
        self.approve(spender.clone(), remaining);
        Ok(remaining)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.granted.iter()
    }
}
