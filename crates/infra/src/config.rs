//! Ledger configuration.
//!
//! Values come from `LEDGERBANK_*` environment variables or a JSON document.
//! Anything missing falls back to the defaults below.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerbank_core::{Address, Amount, DomainError, Percent};
use ledgerbank_lending::{InterestPolicy, LendingPolicy, LoanPolicy};

pub const ENV_BANK_ADDRESS: &str = "LEDGERBANK_BANK_ADDRESS";
pub const ENV_MIN_DEPOSIT: &str = "LEDGERBANK_MIN_DEPOSIT";
pub const ENV_YEARLY_RETURN_RATE: &str = "LEDGERBANK_YEARLY_RETURN_RATE";
pub const ENV_AVG_TIME_UNIT_DURATION: &str = "LEDGERBANK_AVG_TIME_UNIT_DURATION";
pub const ENV_COLLATERALIZATION_RATIO: &str = "LEDGERBANK_COLLATERALIZATION_RATIO";
pub const ENV_LOAN_FEE_RATE: &str = "LEDGERBANK_LOAN_FEE_RATE";

const DEFAULT_BANK_ADDRESS: &str = "ledgerbank";
/// One whole base-asset unit at 18 decimals.
const DEFAULT_MIN_DEPOSIT: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("inconsistent configuration: {0}")]
    Policy(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Address the ledger acts as when pulling collateral through allowances.
    pub bank_address: String,
    pub min_deposit: Amount,
    pub yearly_return_rate: Percent,
    /// Average seconds per time unit.
    pub avg_time_unit_duration: u64,
    pub collateralization_ratio: Percent,
    pub loan_fee_rate: Percent,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bank_address: DEFAULT_BANK_ADDRESS.to_string(),
            min_deposit: Amount::new(DEFAULT_MIN_DEPOSIT),
            yearly_return_rate: Percent::new(10),
            avg_time_unit_duration: 12,
            collateralization_ratio: Percent::new(150),
            loan_fee_rate: Percent::new(1),
        }
    }
}

impl LedgerConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary key lookup (environment, test fixtures).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bank_address: lookup(ENV_BANK_ADDRESS).unwrap_or_else(|| {
                tracing::warn!(
                    "{ENV_BANK_ADDRESS} not set; using default '{}'",
                    defaults.bank_address
                );
                defaults.bank_address.clone()
            }),
            min_deposit: read(&lookup, ENV_MIN_DEPOSIT, defaults.min_deposit, |v| {
                u128::from_str(v).map(Amount::new)
            })?,
            yearly_return_rate: read(&lookup, ENV_YEARLY_RETURN_RATE, defaults.yearly_return_rate, |v| {
                u32::from_str(v).map(Percent::new)
            })?,
            avg_time_unit_duration: read(
                &lookup,
                ENV_AVG_TIME_UNIT_DURATION,
                defaults.avg_time_unit_duration,
                u64::from_str,
            )?,
            collateralization_ratio: read(
                &lookup,
                ENV_COLLATERALIZATION_RATIO,
                defaults.collateralization_ratio,
                |v| u32::from_str(v).map(Percent::new),
            )?,
            loan_fee_rate: read(&lookup, ENV_LOAN_FEE_RATE, defaults.loan_fee_rate, |v| {
                u32::from_str(v).map(Percent::new)
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bank_address()?;
        self.policy()?;
        Ok(())
    }

    pub fn bank_address(&self) -> Result<Address, ConfigError> {
        Ok(Address::parse(&self.bank_address)?)
    }

    /// Build the lending policy these parameters describe.
    pub fn policy(&self) -> Result<LendingPolicy, ConfigError> {
        let interest = InterestPolicy::from_yearly_return_rate(
            self.yearly_return_rate,
            self.min_deposit,
            self.avg_time_unit_duration,
        )?;
        let loan = LoanPolicy {
            collateralization_ratio: self.collateralization_ratio,
            loan_fee_rate: self.loan_fee_rate,
        };
        Ok(LendingPolicy::new(interest, loan)?)
    }
}

fn read<T, E: std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, ConfigError>
where
    T: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => {
            tracing::warn!("{key} not set; using default {default}");
            Ok(default)
        }
    }
}
