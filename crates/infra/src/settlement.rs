//! Asset movement boundary.
//!
//! The ledger never holds balances itself. Accepted events yield transfer legs
//! (`Settles::transfers`) that are applied here, as one all-or-nothing batch per
//! command.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use ledgerbank_core::{Address, Amount, Asset, Direction, DomainError, TransferLeg};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient {asset} funds for {account} (required: {required}, available: {available})")]
    InsufficientFunds {
        account: Address,
        asset: Asset,
        required: Amount,
        available: Amount,
    },

    #[error("{asset} balance of {account} would overflow")]
    Overflow { account: Address, asset: Asset },

    #[error("asset transfer backend unavailable: {0}")]
    Unavailable(String),
}

impl TransferError {
    /// The domain error a caller should see, if this is a business failure.
    pub fn as_domain(&self) -> Option<DomainError> {
        match self {
            TransferError::InsufficientFunds {
                asset,
                required,
                available,
                ..
            } => Some(DomainError::InsufficientFunds {
                asset: *asset,
                required: *required,
                available: *available,
            }),
            TransferError::Overflow { .. } => Some(DomainError::invalid_amount(self.to_string())),
            TransferError::Unavailable(_) => None,
        }
    }
}

/// Credits and debits account balances.
pub trait AssetTransfer: Send + Sync {
    fn credit(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError>;

    /// Fails with `InsufficientFunds` if `amount` exceeds the available balance.
    fn debit(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError>;

    /// Apply legs in order, all-or-nothing.
    ///
    /// The default applies legs one by one and undoes the applied prefix when a
    /// leg fails. Backends with native batches should override it.
    fn apply(&self, legs: &[TransferLeg]) -> Result<(), TransferError> {
        for (idx, leg) in legs.iter().enumerate() {
            if let Err(err) = apply_leg(self, leg) {
                undo(self, &legs[..idx]);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Undo a batch previously accepted by `apply`.
    fn revert(&self, legs: &[TransferLeg]) -> Result<(), TransferError> {
        let reversed: Vec<TransferLeg> = legs.iter().rev().map(TransferLeg::reversed).collect();
        self.apply(&reversed)
    }
}

fn apply_leg<T: AssetTransfer + ?Sized>(backend: &T, leg: &TransferLeg) -> Result<(), TransferError> {
    match leg.direction {
        Direction::Credit => backend.credit(&leg.account, leg.asset, leg.amount),
        Direction::Debit => backend.debit(&leg.account, leg.asset, leg.amount),
    }
}

fn undo<T: AssetTransfer + ?Sized>(backend: &T, applied: &[TransferLeg]) {
    for leg in applied.iter().rev() {
        if let Err(err) = apply_leg(backend, &leg.reversed()) {
            tracing::error!(
                account = %leg.account,
                asset = %leg.asset,
                amount = %leg.amount,
                error = %err,
                "failed to undo transfer leg"
            );
        }
    }
}

impl<T> AssetTransfer for Arc<T>
where
    T: AssetTransfer + ?Sized,
{
    fn credit(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError> {
        (**self).credit(account, asset, amount)
    }

    fn debit(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError> {
        (**self).debit(account, asset, amount)
    }

    fn apply(&self, legs: &[TransferLeg]) -> Result<(), TransferError> {
        (**self).apply(legs)
    }

    fn revert(&self, legs: &[TransferLeg]) -> Result<(), TransferError> {
        (**self).revert(legs)
    }
}

/// In-memory balances for tests/dev.
///
/// Batches are validated against a staged copy under a single lock, so a
/// failing batch never touches the real balances.
#[derive(Debug, Default)]
pub struct InMemoryBalances {
    balances: Mutex<HashMap<(Address, Asset), Amount>>,
}

impl InMemoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint `amount` into an account (test/dev seeding).
    pub fn fund(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError> {
        self.credit(account, asset, amount)
    }

    pub fn balance_of(&self, account: &Address, asset: Asset) -> Amount {
        self.balances
            .lock()
            .ok()
            .and_then(|b| b.get(&(account.clone(), asset)).copied())
            .unwrap_or(Amount::ZERO)
    }

    fn stage(
        staged: &mut HashMap<(Address, Asset), Amount>,
        leg: &TransferLeg,
    ) -> Result<(), TransferError> {
        let slot = staged
            .entry((leg.account.clone(), leg.asset))
            .or_insert(Amount::ZERO);
        *slot = match leg.direction {
            Direction::Credit => slot.checked_add(leg.amount).ok_or_else(|| TransferError::Overflow {
                account: leg.account.clone(),
                asset: leg.asset,
            })?,
            Direction::Debit => {
                slot.checked_sub(leg.amount)
                    .ok_or_else(|| TransferError::InsufficientFunds {
                        account: leg.account.clone(),
                        asset: leg.asset,
                        required: leg.amount,
                        available: *slot,
                    })?
            }
        };
        Ok(())
    }
}

impl AssetTransfer for InMemoryBalances {
    fn credit(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError> {
        self.apply(&[TransferLeg::credit(account.clone(), asset, amount)])
    }

    fn debit(&self, account: &Address, asset: Asset, amount: Amount) -> Result<(), TransferError> {
        self.apply(&[TransferLeg::debit(account.clone(), asset, amount)])
    }

    fn apply(&self, legs: &[TransferLeg]) -> Result<(), TransferError> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|_| TransferError::Unavailable("balance lock poisoned".to_string()))?;

        let mut staged: HashMap<(Address, Asset), Amount> = HashMap::new();
        for leg in legs {
            let key = (leg.account.clone(), leg.asset);
            if !staged.contains_key(&key) {
                let current = balances.get(&key).copied().unwrap_or(Amount::ZERO);
                staged.insert(key, current);
            }
            Self::stage(&mut staged, leg)?;
        }

        balances.extend(staged);
        Ok(())
    }
}
