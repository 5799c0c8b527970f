//! Batch Relay
//!
//! Event-ingestion and response-submission core for an aggregator that
//! watches a ledger for `NewBatch` events and answers them on-chain:
//!
//! - **Subscriptions**: two endpoints feed one deduplicated stream, see [`subscriber`]
//! - **Gap recovery**: periodic scan for batches the live streams missed, see [`poller`]
//! - **Submission**: simulate, check fee limit and balances, then broadcast, see [`writer`]
//!
//! Ledger access goes through [`relay_transport::LedgerClient`]; shared values
//! live in [`relay_types`].

pub mod config;
pub mod dedup;
pub mod poller;
pub mod retry;
pub mod sim;
pub mod subscriber;
pub mod writer;

pub use config::RelayConfig;
pub use dedup::{BatchDeduplicator, Clock, ManualClock, SystemClock};
pub use poller::GapRecoveryPoller;
pub use retry::{retry, RetryConfig};
pub use subscriber::{BatchSubscriber, EndpointRole, SubscriberConfig};
pub use writer::{ResponseWriter, StaticSigner, SubmissionPlan, SubmitError, TxSigner};
