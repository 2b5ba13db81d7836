//! Asset movements implied by accepted events.
//!
//! Aggregates stay pure: instead of touching balances, each event describes
//! the legs that settle it. Infrastructure applies the legs through an
//! asset-transfer adapter, all-or-nothing per command.

use serde::{Deserialize, Serialize};

use crate::id::Address;
use crate::value_object::{Amount, Asset};

/// Direction of a leg, seen from the account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Funds paid out to the account.
    Credit,
    /// Funds taken from the account.
    Debit,
}

/// One balance movement for one account and asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub account: Address,
    pub asset: Asset,
    pub amount: Amount,
    pub direction: Direction,
}

impl TransferLeg {
    pub fn credit(account: Address, asset: Asset, amount: Amount) -> Self {
        Self {
            account,
            asset,
            amount,
            direction: Direction::Credit,
        }
    }

    pub fn debit(account: Address, asset: Asset, amount: Amount) -> Self {
        Self {
            account,
            asset,
            amount,
            direction: Direction::Debit,
        }
    }

    /// The leg that undoes this one.
    pub fn reversed(&self) -> Self {
        let direction = match self.direction {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        };
        Self {
            direction,
            ..self.clone()
        }
    }
}

/// Events that carry balance movements.
pub trait Settles {
    /// Legs to apply, in order, when this event is committed.
    fn transfers(&self) -> Vec<TransferLeg>;
}
