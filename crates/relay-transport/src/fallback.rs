//! Primary/secondary endpoint composition.

use anyhow::Result;
use relay_types::{
    Address, BatchEvent, BatchEventVersion, BatchIdentifier, BatchState, RespondToTaskCall,
    TxHandle, TxOptions, U256,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::{BatchLogStream, LedgerClient, Subscription};

/// A [`LedgerClient`] that serves every call from `primary`, falling back to
/// `fallback` once when the primary call errors.
///
/// This is a single level of fallback. Retrying the pair is the caller's job,
/// usually through the relay's retry executor.
#[derive(Clone)]
pub struct FallbackClient {
    primary: Arc<dyn LedgerClient>,
    fallback: Arc<dyn LedgerClient>,
}

impl FallbackClient {
    pub fn new(primary: Arc<dyn LedgerClient>, fallback: Arc<dyn LedgerClient>) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &Arc<dyn LedgerClient> {
        &self.primary
    }

    pub fn fallback(&self) -> &Arc<dyn LedgerClient> {
        &self.fallback
    }

    async fn with_fallback<T, F, Fut>(&self, what: &'static str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn LedgerClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op(Arc::clone(&self.primary)).await {
            Ok(v) => Ok(v),
            Err(primary_err) => {
                debug!(
                    call = what,
                    error = %primary_err,
                    "primary endpoint failed, trying fallback"
                );
                op(Arc::clone(&self.fallback)).await.map_err(|e| {
                    e.context(format!(
                        "{} failed on primary ({:#}) and fallback",
                        what, primary_err
                    ))
                })
            }
        }
    }
}

#[async_trait::async_trait]
impl LedgerClient for FallbackClient {
    async fn subscribe_new_batches(
        &self,
        version: BatchEventVersion,
        sink: mpsc::Sender<BatchEvent>,
    ) -> Result<Subscription> {
        self.with_fallback("subscribe_new_batches", |c| {
            let sink = sink.clone();
            async move { c.subscribe_new_batches(version, sink).await }
        })
        .await
    }

    async fn filter_new_batches(
        &self,
        version: BatchEventVersion,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<BatchLogStream> {
        self.with_fallback("filter_new_batches", |c| async move {
            c.filter_new_batches(version, from_block, to_block).await
        })
        .await
    }

    async fn batch_state(&self, id: BatchIdentifier) -> Result<BatchState> {
        self.with_fallback("batch_state", |c| async move { c.batch_state(id).await })
            .await
    }

    async fn block_number(&self) -> Result<u64> {
        self.with_fallback("block_number", |c| async move { c.block_number().await })
            .await
    }

    async fn balance_at(&self, account: Address) -> Result<U256> {
        self.with_fallback("balance_at", |c| async move { c.balance_at(account).await })
            .await
    }

    async fn batcher_balance(&self, sender: Address) -> Result<U256> {
        self.with_fallback("batcher_balance", |c| async move {
            c.batcher_balance(sender).await
        })
        .await
    }

    async fn subscribe_new_heads(&self, sink: mpsc::Sender<u64>) -> Result<Subscription> {
        self.with_fallback("subscribe_new_heads", |c| {
            let sink = sink.clone();
            async move { c.subscribe_new_heads(sink).await }
        })
        .await
    }

    async fn respond_to_task(
        &self,
        opts: &TxOptions,
        call: &RespondToTaskCall,
    ) -> Result<TxHandle> {
        self.with_fallback("respond_to_task", |c| async move {
            c.respond_to_task(opts, call).await
        })
        .await
    }
}
