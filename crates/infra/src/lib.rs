//! Infrastructure layer: event store, command dispatch, settlement, rate and
//! clock adapters, configuration and the lending service facade.

pub mod account_locks;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod gateway;
pub mod rates;
pub mod service;
pub mod settlement;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, Committed, DispatchError};
pub use config::{ConfigError, LedgerConfig};
pub use gateway::{Operation, OperationGateway, OperationOutcome};
pub use rates::{Clock, FixedRateProvider, ManualClock, ProviderError, RateProvider, RateSnapshot};
pub use service::{
    AccountView, InMemoryLendingService, LendingService, LoanReceipt, Repayment, Withdrawal,
};
pub use settlement::{AssetTransfer, InMemoryBalances, TransferError};
