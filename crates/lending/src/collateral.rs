//! Loan terms: required collateral and origination fee.
//!
//! Terms are fixed at origination with the exchange rate observed then. They
//! are never re-priced as the rate moves; there is no margin call.

use serde::{Deserialize, Serialize};

use ledgerbank_core::{Amount, DomainError, DomainResult, ExchangeRate, Percent};

use crate::math::{checked_mul, mul_div_floor};

/// Collateral and fee parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPolicy {
    /// 150 means collateral worth 150 % of the loan.
    pub collateralization_ratio: Percent,
    /// Share of the principal withheld at origination.
    pub loan_fee_rate: Percent,
}

impl LoanPolicy {
    pub fn validate(&self) -> DomainResult<()> {
        if self.loan_fee_rate.value() > 100 {
            return Err(DomainError::invalid_amount(format!(
                "loan fee rate {} exceeds 100%",
                self.loan_fee_rate
            )));
        }
        Ok(())
    }

    /// Quote a loan of `loan_amount` at `rate`.
    pub fn quote(&self, loan_amount: Amount, rate: ExchangeRate) -> DomainResult<LoanTerms> {
        if loan_amount.is_zero() {
            return Err(DomainError::invalid_amount("loan amount must be positive"));
        }
        if rate.value() == 0 {
            return Err(DomainError::invalid_amount("exchange rate must be positive"));
        }
        self.validate()?;

        let collateral = required_collateral(loan_amount, rate, self.collateralization_ratio)?;
        let fee = loan_fee(loan_amount, self.loan_fee_rate)?;
        let disbursed = loan_amount
            .checked_sub(fee)
            .ok_or_else(|| DomainError::invalid_amount("loan fee exceeds principal"))?;

        Ok(LoanTerms {
            principal: loan_amount,
            collateral,
            fee,
            disbursed,
            rate,
        })
    }
}

/// Outcome of a quote.
///
/// The borrower receives `disbursed = principal - fee` but owes `principal`
/// in full at repayment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Amount,
    pub collateral: Amount,
    pub fee: Amount,
    pub disbursed: Amount,
    pub rate: ExchangeRate,
}

/// `rate * ratio * loan_amount / 100`, rounded down.
pub fn required_collateral(
    loan_amount: Amount,
    rate: ExchangeRate,
    collateralization_ratio: Percent,
) -> DomainResult<Amount> {
    let per_base = checked_mul(
        rate.value(),
        u128::from(collateralization_ratio.value()),
        "collateral rate",
    )?;
    let collateral = mul_div_floor(per_base, loan_amount.units(), 100, "required collateral")?;
    Ok(Amount::new(collateral))
}

/// `loan_amount * fee_rate / 100`, rounded down.
pub fn loan_fee(loan_amount: Amount, loan_fee_rate: Percent) -> DomainResult<Amount> {
    let fee = mul_div_floor(
        loan_amount.units(),
        u128::from(loan_fee_rate.value()),
        100,
        "loan fee",
    )?;
    Ok(Amount::new(fee))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LoanPolicy {
        LoanPolicy {
            collateralization_ratio: Percent::new(150),
            loan_fee_rate: Percent::new(1),
        }
    }

    #[test]
    fn collateral_for_five_at_rate_ten_is_seventy_five() {
        let collateral =
            required_collateral(Amount::new(5), ExchangeRate::new(10), Percent::new(150)).unwrap();
        assert_eq!(collateral, Amount::new(75));
    }

    #[test]
    fn fee_is_withheld_from_disbursement_not_from_principal() {
        let terms = policy()
            .quote(Amount::new(1_000), ExchangeRate::new(10))
            .unwrap();
        assert_eq!(terms.fee, Amount::new(10));
        assert_eq!(terms.disbursed, Amount::new(990));
        assert_eq!(terms.principal, Amount::new(1_000));
        assert_eq!(terms.collateral, Amount::new(15_000));
    }

    #[test]
    fn fee_rounds_down() {
        assert_eq!(loan_fee(Amount::new(99), Percent::new(1)).unwrap(), Amount::ZERO);
        assert_eq!(loan_fee(Amount::new(250), Percent::new(3)).unwrap(), Amount::new(7));
    }

    #[test]
    fn zero_loan_and_zero_rate_are_rejected() {
        assert!(matches!(
            policy().quote(Amount::ZERO, ExchangeRate::new(10)),
            Err(DomainError::InvalidAmount(_))
        ));
        assert!(matches!(
            policy().quote(Amount::new(5), ExchangeRate::new(0)),
            Err(DomainError::InvalidAmount(_))
        ));
    }

    #[test]
    fn fee_rate_above_hundred_percent_is_invalid() {
        let p = LoanPolicy {
            loan_fee_rate: Percent::new(101),
            ..policy()
        };
        assert!(p.validate().is_err());
        assert!(p.quote(Amount::new(5), ExchangeRate::new(1)).is_err());
    }
}
