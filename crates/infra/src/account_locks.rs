use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ledgerbank_core::Address;

/// Per-account mutual exclusion.
///
/// One mutex per address, created on first use and dropped once no caller
/// holds or waits on it. Holding the guard serializes every mutating operation
/// on that account; different accounts never contend beyond the brief table
/// lookup.
#[derive(Debug, Default)]
pub struct AccountLocks {
    table: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account: &Address) -> Arc<Mutex<()>> {
        // A panic while holding the table lock cannot leave the map inconsistent.
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.entry(account.clone()).or_default().clone()
    }

    /// Run `f` while holding the lock for `account`.
    pub fn with_lock<R>(&self, account: &Address, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(account);
        let result = {
            let _guard: MutexGuard<'_, ()> = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(account, slot);
        result
    }

    fn release(&self, account: &Address, slot: Arc<Mutex<()>>) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Slots are only cloned under the table lock, so a count of two (table
        // plus `slot`) means no one else is holding or queued on it.
        if Arc::strong_count(&slot) == 2 {
            table.remove(account);
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|t| t.len())
            .unwrap_or_else(|p| p.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
