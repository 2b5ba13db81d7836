//! Exchange-rate and clock adapters.
//!
//! Both are read fresh on every operation; nothing here is cached by the
//! ledger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use ledgerbank_core::{ExchangeRate, TimeUnit};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("clock unavailable: {0}")]
    ClockUnavailable(String),
}

/// Source of the secondary-per-base exchange rate.
pub trait RateProvider: Send + Sync {
    fn current_rate(&self) -> Result<ExchangeRate, ProviderError>;
}

/// Source of the current time unit (e.g. latest block height).
pub trait Clock: Send + Sync {
    fn current_time_unit(&self) -> Result<TimeUnit, ProviderError>;
}

impl<T: RateProvider + ?Sized> RateProvider for Arc<T> {
    fn current_rate(&self) -> Result<ExchangeRate, ProviderError> {
        (**self).current_rate()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn current_time_unit(&self) -> Result<TimeUnit, ProviderError> {
        (**self).current_time_unit()
    }
}

/// Rate and time read together for one operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateSnapshot {
    pub rate: ExchangeRate,
    pub now: TimeUnit,
}

impl RateSnapshot {
    pub fn capture(rates: &dyn RateProvider, clock: &dyn Clock) -> Result<Self, ProviderError> {
        Ok(Self {
            rate: rates.current_rate()?,
            now: clock.current_time_unit()?,
        })
    }
}

/// Rate provider returning a settable constant.
#[derive(Debug)]
pub struct FixedRateProvider {
    rate: RwLock<ExchangeRate>,
}

impl FixedRateProvider {
    pub fn new(rate: ExchangeRate) -> Self {
        Self {
            rate: RwLock::new(rate),
        }
    }

    pub fn set_rate(&self, rate: ExchangeRate) {
        match self.rate.write() {
            Ok(mut guard) => *guard = rate,
            Err(poisoned) => *poisoned.into_inner() = rate,
        }
    }
}

impl RateProvider for FixedRateProvider {
    fn current_rate(&self) -> Result<ExchangeRate, ProviderError> {
        self.rate
            .read()
            .map(|r| *r)
            .map_err(|_| ProviderError::RateUnavailable("rate lock poisoned".to_string()))
    }
}

/// Clock advanced by hand. Never moves backwards.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: TimeUnit) -> Self {
        Self {
            now: AtomicU64::new(start.value()),
        }
    }

    /// Move forward by `units`, returning the new time.
    pub fn advance(&self, units: u64) -> TimeUnit {
        let prev = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(units))
            })
            .unwrap_or_else(|t| t);
        TimeUnit::new(prev.saturating_add(units))
    }

    /// Move to `to` unless the clock is already past it.
    pub fn advance_to(&self, to: TimeUnit) -> TimeUnit {
        let prev = self.now.fetch_max(to.value(), Ordering::SeqCst);
        TimeUnit::new(prev.max(to.value()))
    }
}

impl Clock for ManualClock {
    fn current_time_unit(&self) -> Result<TimeUnit, ProviderError> {
        Ok(TimeUnit::new(self.now.load(Ordering::SeqCst)))
    }
}
