//! Ledger transport boundary for batch-relay.
//!
//! The relay never speaks a wire protocol itself. Everything it needs from the
//! ledger goes through [`LedgerClient`]:
//!
//! - [`client`]: the collaborator trait and the [`Subscription`] handle
//! - [`fallback`]: [`FallbackClient`], which tries a primary endpoint and then a secondary one
//! - [`mock`]: [`MockLedger`], an in-memory ledger with failure injection
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use relay_transport::{FallbackClient, LedgerClient, MockLedger, MockMethod};
//!
//! let primary = MockLedger::new();
//! let fallback = MockLedger::new();
//! let client = FallbackClient::new(Arc::new(primary.clone()), Arc::new(fallback));
//!
//! primary.fail_next(MockMethod::BlockNumber, 1);
//! let head = client.block_number().await?; // served by the fallback
//! # let _ = head;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod fallback;
pub mod mock;

pub use client::{BatchLogStream, LedgerClient, Subscription};
pub use fallback::FallbackClient;
pub use mock::{MockLedger, MockMethod};
