//! Tracing/logging setup shared by ledger binaries, tests and benches.

/// Subscriber construction (filters, output format).
pub mod subscriber;

pub use subscriber::{DEFAULT_FILTER, LogFormat, init, init_with};
