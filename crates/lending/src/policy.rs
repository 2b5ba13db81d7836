use serde::{Deserialize, Serialize};

use ledgerbank_core::DomainResult;

use crate::collateral::LoanPolicy;
use crate::interest::InterestPolicy;

/// Ledger-wide parameters every account is judged against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingPolicy {
    pub interest: InterestPolicy,
    pub loan: LoanPolicy,
}

impl LendingPolicy {
    pub fn new(interest: InterestPolicy, loan: LoanPolicy) -> DomainResult<Self> {
        let policy = Self { interest, loan };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.interest.validate()?;
        self.loan.validate()
    }
}
