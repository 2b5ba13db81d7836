//! Domain error model.

use thiserror::Error;

use crate::value_object::{Amount, Asset};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is recoverable by the caller: correct the input (or the
/// balances / allowance backing it) and retry. None of them poison the ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Amount is zero, below the minimum, or would overflow the representation.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("account already holds an active deposit")]
    DepositAlreadyActive,

    #[error("account has no active deposit")]
    NoActiveDeposit,

    #[error("account already holds an active loan")]
    LoanAlreadyActive,

    #[error("account has no active loan")]
    NoActiveLoan,

    /// The spender's allowance does not cover the requested pull.
    #[error("insufficient allowance (required: {required}, available: {available})")]
    InsufficientAllowance { required: Amount, available: Amount },

    /// A debit exceeded the account's available balance.
    #[error("insufficient {asset} funds (required: {required}, available: {available})")]
    InsufficientFunds {
        asset: Asset,
        required: Amount,
        available: Amount,
    },

    /// Repayment must equal the owed principal exactly.
    #[error("repayment mismatch (owed: {owed}, paid: {paid})")]
    RepaymentMismatch { owed: Amount, paid: Amount },

    /// An address failed validation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Stale version / concurrent modification detected by the store.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
