use serde::{Deserialize, Serialize};

use ledgerbank_core::{
    Address, Aggregate, AggregateRoot, Amount, Asset, DomainError, ExchangeRate, Settles,
    TimeUnit, TransferLeg,
};
use ledgerbank_events::Event;

use crate::allowance::AllowanceBook;
use crate::policy::LendingPolicy;

/// An open deposit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub amount: Amount,
    /// Fixed for the lifetime of the deposit.
    pub start_time: TimeUnit,
}

/// At most one deposit per account.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DepositSlot {
    #[default]
    Empty,
    Active(Deposit),
}

/// An open loan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    /// Principal owed at repayment.
    pub amount: Amount,
    /// Secondary asset locked until repayment.
    pub collateral: Amount,
    /// Withheld from the disbursement at origination.
    pub fee: Amount,
    /// Exchange rate the collateral was priced at.
    pub rate: ExchangeRate,
    pub opened_at: TimeUnit,
}

/// At most one loan per account.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LoanSlot {
    #[default]
    Empty,
    Active(Loan),
}

/// Aggregate root: Account.
///
/// Holds one account's deposit, loan and the allowances it granted. Every
/// operation that touches any of these goes through this aggregate, so the
/// per-account lock in the dispatcher linearizes all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    address: Address,
    policy: LendingPolicy,
    deposit: DepositSlot,
    loan: LoanSlot,
    allowances: AllowanceBook,
    version: u64,
}

impl Account {
    /// Fresh, empty account (also the starting point for rehydration).
    pub fn empty(address: Address, policy: LendingPolicy) -> Self {
        Self {
            address,
            policy,
            deposit: DepositSlot::Empty,
            loan: LoanSlot::Empty,
            allowances: AllowanceBook::new(),
            version: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn policy(&self) -> &LendingPolicy {
        &self.policy
    }

    pub fn deposit(&self) -> Option<&Deposit> {
        match &self.deposit {
            DepositSlot::Active(d) => Some(d),
            DepositSlot::Empty => None,
        }
    }

    pub fn loan(&self) -> Option<&Loan> {
        match &self.loan {
            LoanSlot::Active(l) => Some(l),
            LoanSlot::Empty => None,
        }
    }

    pub fn allowance_of(&self, spender: &Address) -> Amount {
        self.allowances.allowance_of(spender)
    }

    pub fn allowances(&self) -> &AllowanceBook {
        &self.allowances
    }

    /// Interest the active deposit would pay if withdrawn at `now`.
    pub fn accrued_interest(&self, now: TimeUnit) -> Result<Amount, DomainError> {
        let deposit = self.deposit().ok_or(DomainError::NoActiveDeposit)?;
        self.policy
            .interest
            .accrued_interest(deposit.amount, deposit.start_time, now)
    }
}

impl AggregateRoot for Account {
    type Id = Address;

    fn id(&self) -> &Self::Id {
        &self.address
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenDeposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDeposit {
    pub account: Address,
    pub amount: Amount,
    pub now: TimeUnit,
}

/// Command: WithdrawDeposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawDeposit {
    pub account: Address,
    pub now: TimeUnit,
}

/// Command: Borrow.
///
/// `spender` is the ledger's own address; collateral is pulled through the
/// allowance the account granted to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrow {
    pub account: Address,
    pub spender: Address,
    pub amount: Amount,
    pub rate: ExchangeRate,
    pub now: TimeUnit,
}

/// Command: PayLoan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayLoan {
    pub account: Address,
    pub payment: Amount,
    pub now: TimeUnit,
}

/// Command: Approve (overwrite, not a delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub owner: Address,
    pub spender: Address,
    pub amount: Amount,
    pub now: TimeUnit,
}

/// Command: ConsumeAllowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeAllowance {
    pub owner: Address,
    pub spender: Address,
    pub amount: Amount,
    pub now: TimeUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenDeposit(OpenDeposit),
    WithdrawDeposit(WithdrawDeposit),
    Borrow(Borrow),
    PayLoan(PayLoan),
    Approve(Approve),
    ConsumeAllowance(ConsumeAllowance),
}

impl AccountCommand {
    /// The account whose stream this command writes to.
    pub fn target(&self) -> &Address {
        match self {
            AccountCommand::OpenDeposit(c) => &c.account,
            AccountCommand::WithdrawDeposit(c) => &c.account,
            AccountCommand::Borrow(c) => &c.account,
            AccountCommand::PayLoan(c) => &c.account,
            AccountCommand::Approve(c) => &c.owner,
            AccountCommand::ConsumeAllowance(c) => &c.owner,
        }
    }
}

/// Event: DepositOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositOpened {
    pub account: Address,
    pub amount: Amount,
    pub start_time: TimeUnit,
}

/// Event: DepositWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositWithdrawn {
    pub account: Address,
    pub principal: Amount,
    pub interest: Amount,
    pub start_time: TimeUnit,
    pub withdrawn_at: TimeUnit,
}

/// Event: LoanOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanOpened {
    pub account: Address,
    pub amount: Amount,
    pub collateral: Amount,
    pub fee: Amount,
    pub disbursed: Amount,
    pub rate: ExchangeRate,
    pub opened_at: TimeUnit,
}

/// Event: LoanRepaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRepaid {
    pub account: Address,
    pub amount: Amount,
    pub collateral: Amount,
    pub repaid_at: TimeUnit,
}

/// Event: AllowanceApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceApproved {
    pub owner: Address,
    pub spender: Address,
    pub amount: Amount,
    pub occurred_at: TimeUnit,
}

/// Event: AllowanceConsumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceConsumed {
    pub owner: Address,
    pub spender: Address,
    pub amount: Amount,
    pub remaining: Amount,
    pub occurred_at: TimeUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    DepositOpened(DepositOpened),
    DepositWithdrawn(DepositWithdrawn),
    LoanOpened(LoanOpened),
    LoanRepaid(LoanRepaid),
    AllowanceApproved(AllowanceApproved),
    AllowanceConsumed(AllowanceConsumed),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::DepositOpened(_) => "lending.account.deposit_opened",
            AccountEvent::DepositWithdrawn(_) => "lending.account.deposit_withdrawn",
            AccountEvent::LoanOpened(_) => "lending.account.loan_opened",
            AccountEvent::LoanRepaid(_) => "lending.account.loan_repaid",
            AccountEvent::AllowanceApproved(_) => "lending.account.allowance_approved",
            AccountEvent::AllowanceConsumed(_) => "lending.account.allowance_consumed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> TimeUnit {
        match self {
            AccountEvent::DepositOpened(e) => e.start_time,
            AccountEvent::DepositWithdrawn(e) => e.withdrawn_at,
            AccountEvent::LoanOpened(e) => e.opened_at,
            AccountEvent::LoanRepaid(e) => e.repaid_at,
            AccountEvent::AllowanceApproved(e) => e.occurred_at,
            AccountEvent::AllowanceConsumed(e) => e.occurred_at,
        }
    }
}

impl Settles for AccountEvent {
    // Debits come first so a short balance fails before anything is paid out.
    fn transfers(&self) -> Vec<TransferLeg> {
        let legs = match self {
            AccountEvent::DepositOpened(e) => {
                vec![TransferLeg::debit(e.account.clone(), Asset::Base, e.amount)]
            }
            AccountEvent::DepositWithdrawn(e) => vec![
                TransferLeg::credit(e.account.clone(), Asset::Base, e.principal),
                TransferLeg::credit(e.account.clone(), Asset::Secondary, e.interest),
            ],
            AccountEvent::LoanOpened(e) => vec![
                TransferLeg::debit(e.account.clone(), Asset::Secondary, e.collateral),
                TransferLeg::credit(e.account.clone(), Asset::Base, e.disbursed),
            ],
            AccountEvent::LoanRepaid(e) => vec![
                TransferLeg::debit(e.account.clone(), Asset::Base, e.amount),
                TransferLeg::credit(e.account.clone(), Asset::Secondary, e.collateral),
            ],
            AccountEvent::AllowanceApproved(_) | AccountEvent::AllowanceConsumed(_) => vec![],
        };
        legs.into_iter().filter(|leg| !leg.amount.is_zero()).collect()
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::DepositOpened(e) => {
                self.deposit = DepositSlot::Active(Deposit {
                    amount: e.amount,
                    start_time: e.start_time,
                });
            }
            AccountEvent::DepositWithdrawn(_) => {
                self.deposit = DepositSlot::Empty;
            }
            AccountEvent::LoanOpened(e) => {
                self.loan = LoanSlot::Active(Loan {
                    amount: e.amount,
                    collateral: e.collateral,
                    fee: e.fee,
                    rate: e.rate,
                    opened_at: e.opened_at,
                });
            }
            AccountEvent::LoanRepaid(_) => {
                self.loan = LoanSlot::Empty;
            }
            AccountEvent::AllowanceApproved(e) => {
                self.allowances.approve(e.spender.clone(), e.amount);
            }
            AccountEvent::AllowanceConsumed(e) => {
                self.allowances.approve(e.spender.clone(), e.remaining);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_target(command.target())?;
        match command {
            AccountCommand::OpenDeposit(cmd) => self.handle_open_deposit(cmd),
            AccountCommand::WithdrawDeposit(cmd) => self.handle_withdraw(cmd),
            AccountCommand::Borrow(cmd) => self.handle_borrow(cmd),
            AccountCommand::PayLoan(cmd) => self.handle_pay_loan(cmd),
            AccountCommand::Approve(cmd) => self.handle_approve(cmd),
            AccountCommand::ConsumeAllowance(cmd) => self.handle_consume(cmd),
        }
    }
}

impl Account {
    fn ensure_target(&self, target: &Address) -> Result<(), DomainError> {
        if *target != self.address {
            return Err(DomainError::invalid_address(format!(
                "command for {target} routed to account {}",
                self.address
            )));
        }
        Ok(())
    }

    fn handle_open_deposit(&self, cmd: &OpenDeposit) -> Result<Vec<AccountEvent>, DomainError> {
        let min = self.policy.interest.min_deposit;
        if cmd.amount < min {
            return Err(DomainError::invalid_amount(format!(
                "deposit {} is below the minimum of {min}",
                cmd.amount
            )));
        }
        if self.deposit().is_some() {
            return Err(DomainError::DepositAlreadyActive);
        }

        Ok(vec![AccountEvent::DepositOpened(DepositOpened {
            account: cmd.account.clone(),
            amount: cmd.amount,
            start_time: cmd.now,
        })])
    }

    fn handle_withdraw(&self, cmd: &WithdrawDeposit) -> Result<Vec<AccountEvent>, DomainError> {
        let deposit = self.deposit().ok_or(DomainError::NoActiveDeposit)?;
        let interest = self.accrued_interest(cmd.now)?;

        Ok(vec![AccountEvent::DepositWithdrawn(DepositWithdrawn {
            account: cmd.account.clone(),
            principal: deposit.amount,
            interest,
            start_time: deposit.start_time,
            withdrawn_at: cmd.now,
        })])
    }

    fn handle_borrow(&self, cmd: &Borrow) -> Result<Vec<AccountEvent>, DomainError> {
        if cmd.amount.is_zero() {
            return Err(DomainError::invalid_amount("loan amount must be positive"));
        }
        if self.loan().is_some() {
            return Err(DomainError::LoanAlreadyActive);
        }

        let terms = self.policy.loan.quote(cmd.amount, cmd.rate)?;
        let remaining = self
            .allowances
            .remaining_after(&cmd.spender, terms.collateral)?;

        Ok(vec![
            AccountEvent::AllowanceConsumed(AllowanceConsumed {
                owner: cmd.account.clone(),
                spender: cmd.spender.clone(),
                amount: terms.collateral,
                remaining,
                occurred_at: cmd.now,
            }),
            AccountEvent::LoanOpened(LoanOpened {
                account: cmd.account.clone(),
                amount: terms.principal,
                collateral: terms.collateral,
                fee: terms.fee,
                disbursed: terms.disbursed,
                rate: terms.rate,
                opened_at: cmd.now,
            }),
        ])
    }

    fn handle_pay_loan(&self, cmd: &PayLoan) -> Result<Vec<AccountEvent>, DomainError> {
        let loan = self.loan().ok_or(DomainError::NoActiveLoan)?;
        if cmd.payment != loan.amount {
            return Err(DomainError::RepaymentMismatch {
                owed: loan.amount,
                paid: cmd.payment,
            });
        }

        Ok(vec![AccountEvent::LoanRepaid(LoanRepaid {
            account: cmd.account.clone(),
            amount: loan.amount,
            collateral: loan.collateral,
            repaid_at: cmd.now,
        })])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<AccountEvent>, DomainError> {
        Ok(vec![AccountEvent::AllowanceApproved(AllowanceApproved {
            owner: cmd.owner.clone(),
            spender: cmd.spender.clone(),
            amount: cmd.amount,
            occurred_at: cmd.now,
        })])
    }

    fn handle_consume(&self, cmd: &ConsumeAllowance) -> Result<Vec<AccountEvent>, DomainError> {
        let remaining = self.allowances.remaining_after(&cmd.spender, cmd.amount)?;
        Ok(vec![AccountEvent::AllowanceConsumed(AllowanceConsumed {
            owner: cmd.owner.clone(),
            spender: cmd.spender.clone(),
            amount: cmd.amount,
            remaining,
            occurred_at: cmd.now,
        })])
    }
}
