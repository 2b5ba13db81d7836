use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use ledgerbank_core::{Address, ExpectedVersion, TimeUnit};
use std::sync::Arc;

/// An event ready to be appended to an account stream (no sequence number yet).
///
/// Built from a typed domain event with `UncommittedEvent::from_typed()`, which
/// serializes the payload and captures the metadata needed to deserialize it
/// again during rehydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub account: Address,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: TimeUnit,

    pub payload: JsonValue,
}

/// A persisted event with its assigned position in the account stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub account: Address,

    /// Monotonically increasing position in the account stream, starting at 1.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    /// Ledger time unit of the event.
    pub occurred_at: TimeUnit,
    /// Wall-clock time the store accepted the event (audit metadata only).
    pub recorded_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an envelope for publication.
    pub fn to_envelope(&self) -> ledgerbank_events::EventEnvelope<JsonValue> {
        ledgerbank_events::EventEnvelope::new(
            self.event_id,
            self.account.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error (infrastructure, not business rules).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("stream version check failed: {0}")]
    Concurrency(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only event store, one stream per account address.
///
/// `append()` must:
/// - reject batches that mix accounts
/// - check `expected_version` against the current stream version
/// - assign sequence numbers `current + 1, current + 2, ...`
/// - persist the whole batch or nothing
///
/// `load_stream()` returns the stream in sequence order, or an empty vector for
/// an account that has never been written to.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, account: &Address) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, account: &Address) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(account)
    }
}

impl UncommittedEvent {
    /// Wrap a typed domain event for persistence.
    pub fn from_typed<E>(account: Address, event_id: Uuid, event: &E) -> Result<Self, EventStoreError>
    where
        E: ledgerbank_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            account,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
