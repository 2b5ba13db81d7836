//! Command execution pipeline for the event-sourced `Account` aggregate.
//!
//! ```text
//! Command builder
//!   ↓  take the per-account lock
//! 0. Build the command (reads clock and rate)
//!   ↓
//! 1. Load the account stream
//!   ↓
//! 2. Rehydrate the aggregate
//!   ↓
//! 3. Handle the command (pure, produces events)
//!   ↓
//! 4. Settle transfer legs (all-or-nothing)
//!   ↓
//! 5. Append events (ExpectedVersion::Exact); on failure revert the legs
//!   ↓
//! 6. Publish committed events
//!   ↓  release the lock
//! ```
//!
//! The lock makes every mutating operation on one account linearizable. The
//! command is built under it, so the time an event records is never older than
//! the events already in its stream. The store's version check stays in place
//! as a second line against writers that bypass the dispatcher.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use ledgerbank_core::{Address, Aggregate, DomainError, ExpectedVersion, Settles, TransferLeg};
use ledgerbank_events::{Event, EventBus, EventEnvelope};

use crate::account_locks::AccountLocks;
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::rates::ProviderError;
use crate::settlement::{AssetTransfer, TransferError};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Business rule rejection. Nothing changed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("event store error: {0}")]
    Store(EventStoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("asset transfer error: {0}")]
    Transfer(TransferError),

    /// The append failed and the settled legs could not be reverted: balances
    /// moved without a recorded event and need reconciliation.
    #[error("append failed ({append}) and settlement revert failed ({revert})")]
    SettlementInconsistent {
        append: EventStoreError,
        revert: TransferError,
    },

    /// Failed to deserialize historical payloads into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// The aggregate accepted a command without emitting the event it implies.
    #[error("unexpected dispatch outcome: {0}")]
    Unexpected(String),
}

impl DispatchError {
    /// The business rule that rejected the operation, if any.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Domain(DomainError::conflict(msg)),
            other => DispatchError::Store(other),
        }
    }
}

impl From<TransferError> for DispatchError {
    fn from(value: TransferError) -> Self {
        match value.as_domain() {
            Some(domain) => DispatchError::Domain(domain),
            None => DispatchError::Transfer(value),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone)]
pub struct Committed<E> {
    /// Typed events decided by the aggregate, in order.
    pub events: Vec<E>,
    /// The same events as persisted, with sequence numbers.
    pub stored: Vec<StoredEvent>,
    /// False when the bus refused an envelope after the append succeeded.
    pub published: bool,
}

impl<E> Committed<E> {
    fn nothing() -> Self {
        Self {
            events: vec![],
            stored: vec![],
            published: true,
        }
    }
}

/// Reusable command execution engine.
///
/// - `S`: event store
/// - `B`: event bus for committed envelopes
/// - `T`: asset transfer backend the decided legs are settled through
#[derive(Debug)]
pub struct CommandDispatcher<S, B, T> {
    store: S,
    bus: B,
    transfers: T,
    locks: AccountLocks,
}

impl<S, B, T> CommandDispatcher<S, B, T> {
    pub fn new(store: S, bus: B, transfers: T) -> Self {
        Self {
            store,
            bus,
            transfers,
            locks: AccountLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn transfers(&self) -> &T {
        &self.transfers
    }
}

impl<S, B, T> CommandDispatcher<S, B, T>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    T: AssetTransfer,
{
    /// Dispatch a command against the stream of `account`.
    ///
    /// `build` runs once the account lock is held; read time-dependent inputs
    /// there. Either the legs are settled and the events appended, or neither
    /// happens. Publication is best effort once the append succeeded and is
    /// reported through `Committed::published`.
    pub fn dispatch<A>(
        &self,
        account: &Address,
        build: impl FnOnce() -> Result<A::Command, DispatchError>,
        make_aggregate: impl FnOnce(Address) -> A,
    ) -> Result<Committed<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Settles + Serialize + DeserializeOwned,
    {
        self.locks.with_lock(account, || {
            let command = build()?;
            self.dispatch_locked(account, command, make_aggregate)
        })
    }

    /// Rehydrate the current state of `account` without taking its lock.
    ///
    /// Appends are atomic, so this always observes a committed prefix.
    pub fn load<A>(
        &self,
        account: &Address,
        make_aggregate: impl FnOnce(Address) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(account)?;
        validate_loaded_stream(account, &history)?;
        let mut aggregate = make_aggregate(account.clone());
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    fn dispatch_locked<A>(
        &self,
        account: &Address,
        command: A::Command,
        make_aggregate: impl FnOnce(Address) -> A,
    ) -> Result<Committed<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Settles + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(account)?;
        validate_loaded_stream(account, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate
        let mut aggregate = make_aggregate(account.clone());
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide
        let decided = aggregate.handle(&command).map_err(|err| {
            tracing::debug!(account = %account, error = %err, "command rejected");
            DispatchError::Domain(err)
        })?;
        if decided.is_empty() {
            return Ok(Committed::nothing());
        }

        // Serialize before moving any assets.
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(account.clone(), Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        // 4) Settle
        let legs: Vec<TransferLeg> = decided.iter().flat_map(|ev| ev.transfers()).collect();
        self.transfers.apply(&legs).map_err(|err| {
            tracing::info!(account = %account, error = %err, "settlement refused");
            DispatchError::from(err)
        })?;

        // 5) Persist
        let stored = match self.store.append(uncommitted, expected) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(account = %account, error = %err, "append failed");
                if let Err(revert) = self.transfers.revert(&legs) {
                    tracing::error!(
                        account = %account,
                        error = %revert,
                        "failed to revert settlement after rejected append"
                    );
                    return Err(DispatchError::SettlementInconsistent { append: err, revert });
                }
                return Err(err.into());
            }
        };

        for ev in &stored {
            tracing::info!(
                account = %account,
                event_type = %ev.event_type,
                sequence_number = ev.sequence_number,
                "event committed"
            );
        }

        // 6) Publish. The append is durable; a bus failure must not hide it.
        let mut published = true;
        for ev in &stored {
            if let Err(e) = self.bus.publish(ev.to_envelope()) {
                tracing::error!(
                    account = %account,
                    sequence_number = ev.sequence_number,
                    error = ?e,
                    "failed to publish committed event"
                );
                published = false;
                break;
            }
        }

        Ok(Committed {
            events: decided,
            stored,
            published,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(account: &Address, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.account != *account {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream for {account} contains an event of {} at index {idx}",
                e.account
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
