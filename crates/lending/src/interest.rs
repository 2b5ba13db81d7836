//! Interest accrual for deposits.
//!
//! Simple, non-compounding accrual: every time unit the deposit is open earns
//! `avg_time_unit_duration * rate_per_second_for_min_deposit` per minimum
//! deposit held. The unit the deposit was opened in counts, so a withdrawal in
//! the same unit still earns one unit of interest.

use serde::{Deserialize, Serialize};

use ledgerbank_core::{Amount, DomainError, DomainResult, Percent, TimeUnit};

use crate::math::{checked_mul, mul_div_floor};

pub const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;

/// Parameters of the accrual formula.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestPolicy {
    /// Smallest deposit accepted; also the unit the rate is quoted for.
    pub min_deposit: Amount,
    /// Secondary-asset units earned per second by one `min_deposit`.
    pub rate_per_second_for_min_deposit: Amount,
    /// Average wall-clock seconds per time unit (e.g. block time).
    pub avg_time_unit_duration: u64,
}

impl InterestPolicy {
    /// Derive the per-second rate from a yearly return percentage:
    /// `min_deposit * yearly / 100 / SECONDS_PER_YEAR`, rounded down.
    pub fn from_yearly_return_rate(
        yearly_return_rate: Percent,
        min_deposit: Amount,
        avg_time_unit_duration: u64,
    ) -> DomainResult<Self> {
        let yearly = checked_mul(
            min_deposit.units(),
            u128::from(yearly_return_rate.value()),
            "yearly interest",
        )?;
        let policy = Self {
            min_deposit,
            rate_per_second_for_min_deposit: Amount::new(yearly / 100 / SECONDS_PER_YEAR),
            avg_time_unit_duration,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.min_deposit.is_zero() {
            return Err(DomainError::invalid_amount("minimum deposit must be positive"));
        }
        Ok(())
    }

    /// Interest earned by `amount` during one time unit.
    pub fn interest_per_time_unit(&self, amount: Amount) -> DomainResult<Amount> {
        scaled_interest(self, 1, amount)
    }

    /// Interest accrued by a deposit of `amount` opened at `start_time`, as of
    /// `current_time`.
    pub fn accrued_interest(
        &self,
        amount: Amount,
        start_time: TimeUnit,
        current_time: TimeUnit,
    ) -> DomainResult<Amount> {
        accrued_interest(
            amount,
            start_time,
            current_time,
            self.rate_per_second_for_min_deposit,
            self.min_deposit,
            self.avg_time_unit_duration,
        )
    }
}

/// Accrued interest as a pure function of its inputs:
///
/// ```text
/// elapsed_units = current_time - start_time + 1
/// interest = avg_time_unit_duration * elapsed_units * rate * amount / min_deposit
/// ```
///
/// All products are taken before the single floor division, so rounding is
/// applied once and always downwards.
pub fn accrued_interest(
    amount: Amount,
    start_time: TimeUnit,
    current_time: TimeUnit,
    rate_per_second_for_min_deposit: Amount,
    min_deposit: Amount,
    avg_time_unit_duration: u64,
) -> DomainResult<Amount> {
    let elapsed = current_time.since(start_time).ok_or_else(|| {
        DomainError::invalid_amount(format!(
            "current time {current_time} precedes deposit start {start_time}"
        ))
    })?;
    let elapsed_units = u128::from(elapsed) + 1;

    let policy = InterestPolicy {
        min_deposit,
        rate_per_second_for_min_deposit,
        avg_time_unit_duration,
    };
    scaled_interest(&policy, elapsed_units, amount)
}

fn scaled_interest(policy: &InterestPolicy, units: u128, amount: Amount) -> DomainResult<Amount> {
    policy.validate()?;
    let seconds = checked_mul(u128::from(policy.avg_time_unit_duration), units, "elapsed seconds")?;
    let per_min_deposit = checked_mul(
        seconds,
        policy.rate_per_second_for_min_deposit.units(),
        "interest per minimum deposit",
    )?;
    let interest = mul_div_floor(
        per_min_deposit,
        amount.units(),
        policy.min_deposit.units(),
        "interest",
    )?;
    Ok(Amount::new(interest))
}
