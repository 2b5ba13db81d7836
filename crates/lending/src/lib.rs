//! Lending module (deposits, collateralized loans, allowances; event-sourced).
//!
//! Pure domain logic only: no IO, no clocks, no price feeds. Time and exchange
//! rates arrive inside commands.

pub mod account;
pub mod allowance;
pub mod collateral;
pub mod interest;
pub mod math;
pub mod policy;

pub use account::{
    Account, AccountCommand, AccountEvent, AllowanceApproved, AllowanceConsumed, Approve, Borrow,
    ConsumeAllowance, Deposit, DepositOpened, DepositSlot, DepositWithdrawn, Loan, LoanOpened,
    LoanRepaid, LoanSlot, OpenDeposit, PayLoan, WithdrawDeposit,
};
pub use allowance::AllowanceBook;
pub use collateral::{LoanPolicy, LoanTerms, loan_fee, required_collateral};
pub use interest::{InterestPolicy, SECONDS_PER_YEAR, accrued_interest};
pub use policy::LendingPolicy;
