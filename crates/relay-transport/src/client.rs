//! The ledger client collaborator.

use anyhow::{anyhow, Result};
use futures::stream::BoxStream;
use relay_types::{
    Address, BatchEvent, BatchEventVersion, BatchIdentifier, BatchState, RespondToTaskCall,
    TxHandle, TxOptions, U256,
};
use std::fmt;
use tokio::sync::mpsc;

/// Finite, per-call stream of historical `NewBatch` logs in block/log order.
///
/// An `Err` item means the scan broke off; whatever was yielded before it is
/// not a complete view of the range.
pub type BatchLogStream = BoxStream<'static, Result<BatchEvent>>;

/// Everything the relay needs from one ledger RPC endpoint.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Push every new `NewBatch` log of `version` into `sink` until the
    /// returned subscription errors or is dropped.
    async fn subscribe_new_batches(
        &self,
        version: BatchEventVersion,
        sink: mpsc::Sender<BatchEvent>,
    ) -> Result<Subscription>;

    /// Historical `NewBatch` logs of `version` in `[from_block, to_block]`.
    /// `to_block = None` means up to the latest block.
    async fn filter_new_batches(
        &self,
        version: BatchEventVersion,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<BatchLogStream>;

    async fn batch_state(&self, id: BatchIdentifier) -> Result<BatchState>;

    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;

    /// Native balance of an account.
    async fn balance_at(&self, account: Address) -> Result<U256>;

    /// Deposit the service manager holds for a batch sender.
    async fn batcher_balance(&self, sender: Address) -> Result<U256>;

    /// Push every new head's block number into `sink`.
    async fn subscribe_new_heads(&self, sink: mpsc::Sender<u64>) -> Result<Subscription>;

    /// Call `respondToTaskV2`. With `opts.no_send` the call is only simulated.
    async fn respond_to_task(
        &self,
        opts: &TxOptions,
        call: &RespondToTaskCall,
    ) -> Result<TxHandle>;
}

/// Handle to a live subscription.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) tears the
/// subscription down on the client side.
pub struct Subscription {
    errors: mpsc::UnboundedReceiver<anyhow::Error>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        errors: mpsc::UnboundedReceiver<anyhow::Error>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            errors,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// Wait for the subscription to fail.
    ///
    /// A closed error stream counts as a failure: the transport has gone away
    /// and no more events will arrive.
    pub async fn err(&mut self) -> anyhow::Error {
        match self.errors.recv().await {
            Some(e) => e,
            None => anyhow!("subscription error stream closed"),
        }
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.on_unsubscribe.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_unsubscribe.is_some())
            .finish()
    }
}
