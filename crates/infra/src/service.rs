//! Application service for the lending ledger.
//!
//! Each mutating operation hands the dispatcher a command builder. The builder
//! reads the clock (and, for borrowing, the exchange rate) once the account
//! lock is held, so the command carries the time and rate the operation is
//! actually linearized at.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use ledgerbank_core::{Address, Amount, ExchangeRate, TimeUnit};
use ledgerbank_events::{EventBus, EventEnvelope, InMemoryEventBus};
use ledgerbank_lending::{
    Account, AccountCommand, AccountEvent, Approve, Borrow, ConsumeAllowance, Deposit,
    LendingPolicy, Loan, LoanTerms, OpenDeposit, PayLoan, WithdrawDeposit, loan_fee,
    required_collateral,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::{ConfigError, LedgerConfig};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::rates::{Clock, RateProvider, RateSnapshot};
use crate::settlement::{AssetTransfer, InMemoryBalances};

/// Paid out when a deposit is withdrawn.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Base asset returned.
    pub principal: Amount,
    /// Secondary asset paid as interest.
    pub interest: Amount,
}

/// Terms of a loan that was just opened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanReceipt {
    /// Owed in full at repayment.
    pub principal: Amount,
    pub collateral: Amount,
    pub fee: Amount,
    /// Base asset actually credited (`principal - fee`).
    pub disbursed: Amount,
    pub rate: ExchangeRate,
    pub opened_at: TimeUnit,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repayment {
    pub paid: Amount,
    pub collateral_released: Amount,
}

/// Read-side snapshot of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub address: Address,
    pub deposit: Option<Deposit>,
    pub loan: Option<Loan>,
    /// Allowances granted by this account, by spender.
    pub allowances: Vec<(Address, Amount)>,
    pub version: u64,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        use ledgerbank_core::AggregateRoot;

        Self {
            address: account.address().clone(),
            deposit: account.deposit().copied(),
            loan: account.loan().copied(),
            allowances: account
                .allowances()
                .iter()
                .map(|(spender, amount)| (spender.clone(), *amount))
                .collect(),
            version: account.version(),
        }
    }
}

pub struct LendingService<S, B, T> {
    dispatcher: CommandDispatcher<S, B, T>,
    rates: Arc<dyn RateProvider>,
    clock: Arc<dyn Clock>,
    policy: LendingPolicy,
    bank: Address,
}

impl<S, B, T> LendingService<S, B, T> {
    pub fn new(
        dispatcher: CommandDispatcher<S, B, T>,
        rates: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
        config: &LedgerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            dispatcher,
            rates,
            clock,
            policy: config.policy()?,
            bank: config.bank_address()?,
        })
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B, T> {
        &self.dispatcher
    }

    pub fn policy(&self) -> &LendingPolicy {
        &self.policy
    }

    /// The ledger's own address (spender of collateral allowances).
    pub fn bank_address(&self) -> &Address {
        &self.bank
    }
}

impl<S, B, T> LendingService<S, B, T>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    T: AssetTransfer,
{
    fn run(
        &self,
        account: &Address,
        build: impl FnOnce() -> Result<AccountCommand, DispatchError>,
    ) -> Result<Vec<AccountEvent>, DispatchError> {
        let policy = self.policy;
        let committed = self
            .dispatcher
            .dispatch(account, build, |address| Account::empty(address, policy))?;
        if !committed.published {
            tracing::warn!(account = %account, "operation committed but not published");
        }
        Ok(committed.events)
    }

    fn load(&self, account: &Address) -> Result<Account, DispatchError> {
        let policy = self.policy;
        self.dispatcher
            .load(account, |address| Account::empty(address, policy))
    }

    fn now(&self) -> Result<TimeUnit, DispatchError> {
        Ok(self.clock.current_time_unit()?)
    }

    /// Open a deposit of `amount` base asset, starting now.
    pub fn deposit(&self, account: &Address, amount: Amount) -> Result<Deposit, DispatchError> {
        let events = self.run(account, || {
            Ok(AccountCommand::OpenDeposit(OpenDeposit {
                account: account.clone(),
                amount,
                now: self.now()?,
            }))
        })?;

        let deposit = events
            .iter()
            .find_map(|ev| match ev {
                AccountEvent::DepositOpened(d) => Some(Deposit {
                    amount: d.amount,
                    start_time: d.start_time,
                }),
                _ => None,
            })
            .ok_or_else(|| missing("DepositOpened"))?;

        tracing::info!(
            account = %account,
            amount = %deposit.amount,
            start_time = %deposit.start_time,
            "deposit opened"
        );
        Ok(deposit)
    }

    /// Close the active deposit, paying back the principal plus interest.
    pub fn withdraw(&self, account: &Address) -> Result<Withdrawal, DispatchError> {
        let events = self.run(account, || {
            Ok(AccountCommand::WithdrawDeposit(WithdrawDeposit {
                account: account.clone(),
                now: self.now()?,
            }))
        })?;

        let withdrawal = events
            .iter()
            .find_map(|ev| match ev {
                AccountEvent::DepositWithdrawn(w) => Some(Withdrawal {
                    principal: w.principal,
                    interest: w.interest,
                }),
                _ => None,
            })
            .ok_or_else(|| missing("DepositWithdrawn"))?;

        tracing::info!(
            account = %account,
            principal = %withdrawal.principal,
            interest = %withdrawal.interest,
            "deposit withdrawn"
        );
        Ok(withdrawal)
    }

    /// Borrow `amount` base asset against collateral priced at the current rate.
    ///
    /// The collateral is pulled through the allowance `account` granted to the
    /// ledger's own address; approve at least the previewed collateral first.
    pub fn borrow(&self, account: &Address, amount: Amount) -> Result<LoanReceipt, DispatchError> {
        let events = self.run(account, || {
            let snapshot = RateSnapshot::capture(self.rates.as_ref(), self.clock.as_ref())?;
            Ok(AccountCommand::Borrow(Borrow {
                account: account.clone(),
                spender: self.bank.clone(),
                amount,
                rate: snapshot.rate,
                now: snapshot.now,
            }))
        })?;

        let receipt = events
            .iter()
            .find_map(|ev| match ev {
                AccountEvent::LoanOpened(l) => Some(LoanReceipt {
                    principal: l.amount,
                    collateral: l.collateral,
                    fee: l.fee,
                    disbursed: l.disbursed,
                    rate: l.rate,
                    opened_at: l.opened_at,
                }),
                _ => None,
            })
            .ok_or_else(|| missing("LoanOpened"))?;

        tracing::info!(
            account = %account,
            amount = %receipt.principal,
            collateral = %receipt.collateral,
            fee = %receipt.fee,
            rate = %receipt.rate,
            "loan opened"
        );
        Ok(receipt)
    }

    /// Repay the active loan. `payment` must equal the principal exactly.
    pub fn pay_loan(&self, account: &Address, payment: Amount) -> Result<Repayment, DispatchError> {
        let events = self.run(account, || {
            Ok(AccountCommand::PayLoan(PayLoan {
                account: account.clone(),
                payment,
                now: self.now()?,
            }))
        })?;

        let repayment = events
            .iter()
            .find_map(|ev| match ev {
                AccountEvent::LoanRepaid(r) => Some(Repayment {
                    paid: r.amount,
                    collateral_released: r.collateral,
                }),
                _ => None,
            })
            .ok_or_else(|| missing("LoanRepaid"))?;

        tracing::info!(
            account = %account,
            paid = %repayment.paid,
            collateral_released = %repayment.collateral_released,
            "loan repaid"
        );
        Ok(repayment)
    }

    /// Set the allowance `owner` grants `spender` to exactly `amount`.
    ///
    /// This overwrites any previous allowance; it does not add to it.
    pub fn approve(
        &self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), DispatchError> {
        self.run(owner, || {
            Ok(AccountCommand::Approve(Approve {
                owner: owner.clone(),
                spender: spender.clone(),
                amount,
                now: self.now()?,
            }))
        })?;

        tracing::info!(owner = %owner, spender = %spender, amount = %amount, "allowance approved");
        Ok(())
    }

    /// Pull `amount` from the allowance `owner` granted `spender`. Returns what remains.
    pub fn consume(
        &self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Amount, DispatchError> {
        let events = self.run(owner, || {
            Ok(AccountCommand::ConsumeAllowance(ConsumeAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
                amount,
                now: self.now()?,
            }))
        })?;

        let remaining = events
            .iter()
            .find_map(|ev| match ev {
                AccountEvent::AllowanceConsumed(c) => Some(c.remaining),
                _ => None,
            })
            .ok_or_else(|| missing("AllowanceConsumed"))?;

        tracing::debug!(owner = %owner, spender = %spender, amount = %amount, remaining = %remaining, "allowance consumed");
        Ok(remaining)
    }

    /// Snapshot of `account`; an address never seen is an empty account.
    pub fn get_account(&self, account: &Address) -> Result<AccountView, DispatchError> {
        Ok(AccountView::from(&self.load(account)?))
    }

    pub fn get_deposit(&self, account: &Address) -> Result<Option<Deposit>, DispatchError> {
        Ok(self.load(account)?.deposit().copied())
    }

    pub fn get_loan(&self, account: &Address) -> Result<Option<Loan>, DispatchError> {
        Ok(self.load(account)?.loan().copied())
    }

    /// Zero if `owner` never approved `spender`.
    pub fn get_allowance(&self, owner: &Address, spender: &Address) -> Result<Amount, DispatchError> {
        Ok(self.load(owner)?.allowance_of(spender))
    }

    /// Interest the active deposit of `account` would pay if withdrawn now.
    pub fn accrued_interest(&self, account: &Address) -> Result<Amount, DispatchError> {
        let now = self.now()?;
        Ok(self.load(account)?.accrued_interest(now)?)
    }

    /// Interest a deposit of `amount` would earn per time unit.
    pub fn preview_interest_per_time_unit(&self, amount: Amount) -> Result<Amount, DispatchError> {
        Ok(self.policy.interest.interest_per_time_unit(amount)?)
    }

    /// Collateral a loan of `amount` would require at the current rate.
    pub fn preview_required_collateral(&self, amount: Amount) -> Result<Amount, DispatchError> {
        let rate = self.rates.current_rate()?;
        Ok(required_collateral(
            amount,
            rate,
            self.policy.loan.collateralization_ratio,
        )?)
    }

    pub fn preview_loan_fee(&self, amount: Amount) -> Result<Amount, DispatchError> {
        Ok(loan_fee(amount, self.policy.loan.loan_fee_rate)?)
    }

    /// Full terms a loan of `amount` would get at the current rate.
    pub fn preview_loan(&self, amount: Amount) -> Result<LoanTerms, DispatchError> {
        let rate = self.rates.current_rate()?;
        Ok(self.policy.loan.quote(amount, rate)?)
    }
}

/// Service over the in-memory store, bus and balances (tests/dev).
pub type InMemoryLendingService = LendingService<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    Arc<InMemoryBalances>,
>;

impl InMemoryLendingService {
    pub fn in_memory(
        config: &LedgerConfig,
        balances: Arc<InMemoryBalances>,
        rates: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let dispatcher = CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            balances,
        );
        Self::new(dispatcher, rates, clock, config)
    }
}

fn missing(event: &str) -> DispatchError {
    DispatchError::Unexpected(format!("committed events lack {event}"))
}
