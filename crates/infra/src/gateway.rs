//! Single entry point for an outer layer (wallet, RPC, network adapter).
//!
//! Operations and outcomes are plain serde values, so a transport only has to
//! move JSON in and out.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use ledgerbank_core::{Address, Amount};
use ledgerbank_events::{EventBus, EventEnvelope};
use ledgerbank_lending::{Deposit, Loan, LoanTerms};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::service::{AccountView, LendingService, LoanReceipt, Repayment, Withdrawal};
use crate::settlement::AssetTransfer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Deposit { account: Address, amount: Amount },
    Withdraw { account: Address },
    Borrow { account: Address, amount: Amount },
    PayLoan { account: Address, payment: Amount },
    /// Overwrites the previous allowance.
    Approve { owner: Address, spender: Address, amount: Amount },
    Consume { owner: Address, spender: Address, amount: Amount },
    GetAccount { account: Address },
    GetDeposit { account: Address },
    GetLoan { account: Address },
    GetAllowance { owner: Address, spender: Address },
    AccruedInterest { account: Address },
    PreviewInterest { amount: Amount },
    PreviewLoan { amount: Amount },
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::Deposit { .. }
                | Operation::Withdraw { .. }
                | Operation::Borrow { .. }
                | Operation::PayLoan { .. }
                | Operation::Approve { .. }
                | Operation::Consume { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum OperationOutcome {
    Deposited(Deposit),
    Withdrawn(Withdrawal),
    Borrowed(LoanReceipt),
    Repaid(Repayment),
    Approved,
    Consumed { remaining: Amount },
    Account(AccountView),
    CurrentDeposit(Option<Deposit>),
    CurrentLoan(Option<Loan>),
    Allowance(Amount),
    Interest(Amount),
    LoanQuote(LoanTerms),
}

pub trait OperationGateway: Send + Sync {
    fn submit(&self, operation: Operation) -> Result<OperationOutcome, DispatchError>;
}

impl<S, B, T> OperationGateway for LendingService<S, B, T>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    T: AssetTransfer,
{
    fn submit(&self, operation: Operation) -> Result<OperationOutcome, DispatchError> {
        let mutation = operation.is_mutation();
        let outcome = match operation {
            Operation::Deposit { account, amount } => {
                OperationOutcome::Deposited(self.deposit(&account, amount)?)
            }
            Operation::Withdraw { account } => OperationOutcome::Withdrawn(self.withdraw(&account)?),
            Operation::Borrow { account, amount } => {
                OperationOutcome::Borrowed(self.borrow(&account, amount)?)
            }
            Operation::PayLoan { account, payment } => {
                OperationOutcome::Repaid(self.pay_loan(&account, payment)?)
            }
            Operation::Approve {
                owner,
                spender,
                amount,
            } => {
                self.approve(&owner, &spender, amount)?;
                OperationOutcome::Approved
            }
            Operation::Consume {
                owner,
                spender,
                amount,
            } => OperationOutcome::Consumed {
                remaining: self.consume(&owner, &spender, amount)?,
            },
            Operation::GetAccount { account } => OperationOutcome::Account(self.get_account(&account)?),
            Operation::GetDeposit { account } => OperationOutcome::CurrentDeposit(self.get_deposit(&account)?),
            Operation::GetLoan { account } => OperationOutcome::CurrentLoan(self.get_loan(&account)?),
            Operation::GetAllowance { owner, spender } => {
                OperationOutcome::Allowance(self.get_allowance(&owner, &spender)?)
            }
            Operation::AccruedInterest { account } => {
                OperationOutcome::Interest(self.accrued_interest(&account)?)
            }
            Operation::PreviewInterest { amount } => {
                OperationOutcome::Interest(self.preview_interest_per_time_unit(amount)?)
            }
            Operation::PreviewLoan { amount } => OperationOutcome::LoanQuote(self.preview_loan(amount)?),
        };

        if mutation {
            tracing::debug!(?outcome, "operation applied");
        }
        Ok(outcome)
    }
}
