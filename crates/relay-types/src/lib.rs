//! Shared types for the batch-relay workspace.
//!
//! This crate holds the domain values that both the transport layer and the
//! relay core need, so neither has to depend on the other for them.
//!
//! ## Batch Types
//!
//! The [`batch`] module contains the values observed from the ledger:
//! - [`BatchEvent`](batch::BatchEvent) - A `NewBatch` log, V2 or V3
//! - [`BatchIdentifier`](batch::BatchIdentifier) - `keccak256(merkle_root ‖ sender)`
//! - [`BatchState`](batch::BatchState) - On-chain `batchesState` record
//!
//! ## Transaction Types
//!
//! The [`tx`] module contains the values exchanged with the signer and the
//! response-submission call.

pub mod batch;
pub mod tx;

pub use batch::{BatchEvent, BatchEventVersion, BatchIdentifier, BatchState};
pub use tx::{RespondToTaskCall, TxHandle, TxOptions};

pub use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior on network operations.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retry attempts after the first call.
    pub retries: usize,
    /// Initial backoff duration between retries.
    #[serde(with = "millis", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    #[serde(with = "millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after every failed attempt.
    pub factor: f64,
}

impl RetryConfig {
    /// Create a new RetryConfig with the specified parameters.
    pub fn new(retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64, factor: f64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            factor,
        }
    }

    /// Parameters for contract reads and response transactions.
    pub fn chain() -> Self {
        Self::new(3, 1_000, 60_000, 2.0)
    }

    /// Parameters for subscriptions and head queries, which tolerate longer outages.
    pub fn network() -> Self {
        Self::new(5, 1_000, 60_000, 2.0)
    }

    /// Backoff to wait after `delay`, grown by `factor` and capped at `max_backoff`.
    ///
    /// A product too large for `Duration` saturates at `max_backoff`.
    pub fn next_backoff(&self, delay: Duration) -> Duration {
        let grown = delay.as_secs_f64() * self.factor.max(1.0);
        match Duration::try_from_secs_f64(grown) {
            Ok(next) => std::cmp::min(next, self.max_backoff),
            Err(_) => self.max_backoff,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::chain()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
