//! `ledgerbank-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod transfer;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::Address;
pub use transfer::{Direction, Settles, TransferLeg};
pub use value_object::{Amount, Asset, ExchangeRate, Percent, TimeUnit, ValueObject};
