//! In-memory ledger for tests and local simulation.
//!
//! [`MockLedger`] is cheap to clone; every clone shares the same state, so a
//! test keeps one clone for control while the relay owns another.

use anyhow::{bail, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use relay_types::{
    Address, BatchEvent, BatchEventVersion, BatchIdentifier, BatchState, RespondToTaskCall,
    TxHandle, TxOptions, B256, U256,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::{BatchLogStream, LedgerClient, Subscription};

/// Gas reported by simulated and broadcast calls unless overridden.
pub const DEFAULT_SIMULATED_GAS: u64 = 300_000;

/// Ledger methods that can be counted and failed on demand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MockMethod {
    SubscribeNewBatches,
    /// Failing this makes the `filter_new_batches` call itself error.
    FilterNewBatches,
    /// Failing this makes the returned log stream end with an `Err` item.
    FilterStream,
    BatchState,
    BlockNumber,
    BalanceAt,
    BatcherBalance,
    SubscribeNewHeads,
    RespondToTask,
}

struct LiveBatchSub {
    id: u64,
    version: BatchEventVersion,
    sink: mpsc::Sender<BatchEvent>,
    errors: mpsc::UnboundedSender<anyhow::Error>,
}

struct LiveHeadSub {
    id: u64,
    sink: mpsc::Sender<u64>,
    // Held so the subscription's error stream stays open.
    _errors: mpsc::UnboundedSender<anyhow::Error>,
}

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<BatchEvent>,
    states: HashMap<BatchIdentifier, BatchState>,
    balances: HashMap<Address, U256>,
    batcher_balances: HashMap<Address, U256>,
    simulated_gas: Option<u64>,
    batch_subs: Vec<LiveBatchSub>,
    head_subs: Vec<LiveHeadSub>,
    next_sub_id: u64,
    failures: HashMap<MockMethod, usize>,
    delays: HashMap<MockMethod, Duration>,
    calls: HashMap<MockMethod, usize>,
    respond_calls: Vec<TxOptions>,
    tx_counter: u64,
}

impl MockState {
    /// Count the call and consume one injected failure if any is pending.
    fn enter(&mut self, method: MockMethod) -> Result<()> {
        *self.calls.entry(method).or_default() += 1;
        if let Some(pending) = self.failures.get_mut(&method) {
            if *pending > 0 {
                *pending -= 1;
                bail!("injected {:?} failure", method);
            }
        }
        Ok(())
    }

    fn take_failure(&mut self, method: MockMethod) -> bool {
        match self.failures.get_mut(&method) {
            Some(pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Shared-state in-memory [`LedgerClient`].
#[derive(Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Chain state
    // =========================================================================

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn head(&self) -> u64 {
        self.state.lock().head
    }

    /// Move the head forward and notify head subscribers.
    pub async fn advance_head(&self, blocks: u64) -> u64 {
        let (head, sinks) = {
            let mut state = self.state.lock();
            state.head += blocks;
            let sinks: Vec<_> = state.head_subs.iter().map(|s| s.sink.clone()).collect();
            (state.head, sinks)
        };
        for sink in sinks {
            let _ = sink.send(head).await;
        }
        head
    }

    /// Record a historical log, visible to `filter_new_batches`.
    pub fn push_log(&self, event: BatchEvent) {
        self.state.lock().logs.push(event);
    }

    pub fn set_batch_state(&self, id: BatchIdentifier, state: BatchState) {
        self.state.lock().states.insert(id, state);
    }

    pub fn set_balance(&self, account: Address, amount: U256) {
        self.state.lock().balances.insert(account, amount);
    }

    pub fn set_batcher_balance(&self, sender: Address, amount: U256) {
        self.state.lock().batcher_balances.insert(sender, amount);
    }

    pub fn set_simulated_gas(&self, gas: u64) {
        self.state.lock().simulated_gas = Some(gas);
    }

    // =========================================================================
    // Live subscriptions
    // =========================================================================

    /// Deliver `event` to every live subscription of its version.
    ///
    /// Returns how many subscriptions received it.
    pub async fn emit(&self, event: BatchEvent) -> usize {
        let sinks: Vec<_> = {
            let state = self.state.lock();
            state
                .batch_subs
                .iter()
                .filter(|s| s.version == event.version)
                .map(|s| s.sink.clone())
                .collect()
        };
        let mut delivered = 0;
        for sink in sinks {
            if sink.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Kill every live batch subscription with a transport error.
    ///
    /// Returns how many subscriptions were severed.
    pub fn sever_subscriptions(&self) -> usize {
        let subs = std::mem::take(&mut self.state.lock().batch_subs);
        let count = subs.len();
        for sub in subs {
            let _ = sub.errors.send(anyhow::anyhow!("websocket connection reset"));
        }
        count
    }

    pub fn live_subscriptions(&self) -> usize {
        self.state.lock().batch_subs.len()
    }

    // =========================================================================
    // Failure injection and inspection
    // =========================================================================

    /// Make the next `count` calls of `method` fail.
    pub fn fail_next(&self, method: MockMethod, count: usize) {
        *self.state.lock().failures.entry(method).or_default() += count;
    }

    /// Make every call of `method` take `delay` before it answers.
    pub fn set_delay(&self, method: MockMethod, delay: Duration) {
        self.state.lock().delays.insert(method, delay);
    }

    async fn stall(&self, method: MockMethod) {
        let delay = self.state.lock().delays.get(&method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn call_count(&self, method: MockMethod) -> usize {
        self.state.lock().calls.get(&method).copied().unwrap_or(0)
    }

    /// Options of every `respond_to_task` call that reached this endpoint.
    pub fn respond_calls(&self) -> Vec<TxOptions> {
        self.state.lock().respond_calls.clone()
    }

    /// Options of the calls that were actually broadcast.
    pub fn broadcasts(&self) -> Vec<TxOptions> {
        self.respond_calls()
            .into_iter()
            .filter(|o| !o.no_send)
            .collect()
    }
}

#[async_trait::async_trait]
impl LedgerClient for MockLedger {
    async fn subscribe_new_batches(
        &self,
        version: BatchEventVersion,
        sink: mpsc::Sender<BatchEvent>,
    ) -> Result<Subscription> {
        self.stall(MockMethod::SubscribeNewBatches).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::SubscribeNewBatches)?;
        let id = state.next_sub_id;
        state.next_sub_id += 1;
        let (errors, errors_rx) = mpsc::unbounded_channel();
        state.batch_subs.push(LiveBatchSub {
            id,
            version,
            sink,
            errors,
        });

        let shared = Arc::clone(&self.state);
        Ok(Subscription::new(errors_rx, move || {
            shared.lock().batch_subs.retain(|s| s.id != id);
        }))
    }

    async fn filter_new_batches(
        &self,
        version: BatchEventVersion,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<BatchLogStream> {
        self.stall(MockMethod::FilterNewBatches).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::FilterNewBatches)?;
        let end = to_block.unwrap_or(state.head);
        let mut logs: Vec<BatchEvent> = state
            .logs
            .iter()
            .filter(|e| {
                e.version == version && e.block_number >= from_block && e.block_number <= end
            })
            .cloned()
            .collect();
        logs.sort_by_key(|e| (e.block_number, e.log_index));

        let mut items: Vec<Result<BatchEvent>> = logs.into_iter().map(Ok).collect();
        if state.take_failure(MockMethod::FilterStream) {
            items.push(Err(anyhow::anyhow!("log iterator failed mid-scan")));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn batch_state(&self, id: BatchIdentifier) -> Result<BatchState> {
        self.stall(MockMethod::BatchState).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::BatchState)?;
        Ok(state.states.get(&id).cloned().unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64> {
        self.stall(MockMethod::BlockNumber).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::BlockNumber)?;
        Ok(state.head)
    }

    async fn balance_at(&self, account: Address) -> Result<U256> {
        self.stall(MockMethod::BalanceAt).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::BalanceAt)?;
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }

    async fn batcher_balance(&self, sender: Address) -> Result<U256> {
        self.stall(MockMethod::BatcherBalance).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::BatcherBalance)?;
        Ok(state.batcher_balances.get(&sender).copied().unwrap_or_default())
    }

    async fn subscribe_new_heads(&self, sink: mpsc::Sender<u64>) -> Result<Subscription> {
        self.stall(MockMethod::SubscribeNewHeads).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::SubscribeNewHeads)?;
        let id = state.next_sub_id;
        state.next_sub_id += 1;
        let (errors, errors_rx) = mpsc::unbounded_channel();
        state.head_subs.push(LiveHeadSub {
            id,
            sink,
            _errors: errors,
        });

        let shared = Arc::clone(&self.state);
        Ok(Subscription::new(errors_rx, move || {
            shared.lock().head_subs.retain(|s| s.id != id);
        }))
    }

    async fn respond_to_task(
        &self,
        opts: &TxOptions,
        call: &RespondToTaskCall,
    ) -> Result<TxHandle> {
        self.stall(MockMethod::RespondToTask).await;
        let mut state = self.state.lock();
        state.enter(MockMethod::RespondToTask)?;
        state.tx_counter += 1;
        state.respond_calls.push(opts.clone());

        let mut preimage = call.merkle_root.to_vec();
        preimage.extend_from_slice(&state.tx_counter.to_be_bytes());
        let gas = opts
            .gas_limit
            .unwrap_or_else(|| state.simulated_gas.unwrap_or(DEFAULT_SIMULATED_GAS));
        Ok(TxHandle {
            hash: relay_types::keccak256(&preimage),
            gas,
            gas_price: opts.gas_price,
        })
    }
}
