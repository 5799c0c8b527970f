//! Dual-endpoint subscription to new batches.
//!
//! Two websocket endpoints watch the same `NewBatch` stream and push into one
//! internal channel. A single processing loop drains that channel together
//! with a gap-recovery tick, deduplicates, and forwards novel batches to the
//! caller. Each endpoint has its own supervisor task that resubscribes on
//! failure, so losing one endpoint is masked by the other while it recovers.

use anyhow::{anyhow, Context, Result};
use relay_transport::{FallbackClient, LedgerClient, Subscription};
use relay_types::{BatchEvent, BatchEventVersion};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::dedup::{BatchDeduplicator, Clock, SystemClock, DEFAULT_RETENTION};
use crate::poller::{GapRecoveryPoller, DEFAULT_LOOKBACK_BLOCKS, DEFAULT_POLL_INTERVAL};
use crate::retry::{retry, RetryConfig};

/// Buffered errors before new resubscription failures start being dropped.
const ERROR_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Period of the gap-recovery scan.
    pub poll_interval: Duration,
    /// How many blocks behind the head the scan starts.
    pub lookback_blocks: u64,
    /// How long a forwarded batch suppresses duplicates.
    pub retention: Duration,
    /// Pause after a resubscription gave up, before trying again.
    pub resubscribe_cooldown: Duration,
    pub internal_channel_capacity: usize,
    /// Used for subscribing, resubscribing and every gap-recovery read.
    pub network_retry: RetryConfig,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
            retention: DEFAULT_RETENTION,
            resubscribe_cooldown: Duration::from_secs(1),
            internal_channel_capacity: 256,
            network_retry: RetryConfig::network(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointRole {
    Primary,
    Fallback,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Primary => write!(f, "primary"),
            EndpointRole::Fallback => write!(f, "fallback"),
        }
    }
}

/// Watches both endpoints for new batches.
pub struct BatchSubscriber {
    primary: Arc<dyn LedgerClient>,
    fallback: Arc<dyn LedgerClient>,
    config: SubscriberConfig,
    clock: Arc<dyn Clock>,
}

impl BatchSubscriber {
    pub fn new(
        primary: Arc<dyn LedgerClient>,
        fallback: Arc<dyn LedgerClient>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for dedup expiry instead of tokio's clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    fn endpoint(&self, role: EndpointRole) -> Arc<dyn LedgerClient> {
        match role {
            EndpointRole::Primary => Arc::clone(&self.primary),
            EndpointRole::Fallback => Arc::clone(&self.fallback),
        }
    }

    /// Reads that should survive one endpoint being down.
    fn reader(&self) -> FallbackClient {
        FallbackClient::new(Arc::clone(&self.primary), Arc::clone(&self.fallback))
    }

    /// Start forwarding novel `version` batches into `output`.
    ///
    /// Fails only if the initial subscription to either endpoint is exhausted.
    /// Afterwards everything runs on background tasks for the lifetime of the
    /// process (or until `output` is dropped). Resubscriptions that give up are
    /// reported on the returned channel and retried after a cooldown.
    pub async fn subscribe_to_new_batches(
        &self,
        version: BatchEventVersion,
        output: mpsc::Sender<BatchEvent>,
    ) -> Result<mpsc::Receiver<anyhow::Error>> {
        let (internal_tx, internal_rx) = mpsc::channel(self.config.internal_channel_capacity);
        let retry_cfg = self.config.network_retry;

        let mut subscriptions = Vec::with_capacity(2);
        for role in [EndpointRole::Primary, EndpointRole::Fallback] {
            let client = self.endpoint(role);
            let sub = subscribe_retryable(&client, version, &internal_tx, retry_cfg)
                .await
                .map_err(|e| {
                    error!(
                        endpoint = %role,
                        retries = retry_cfg.retries,
                        error = %format!("{:#}", e),
                        "failed to subscribe to new batches"
                    );
                    e
                })
                .with_context(|| {
                    format!("{} failed to subscribe to new {} batches", role, version)
                })?;
            subscriptions.push((role, client, sub));
        }
        info!(%version, "Subscribed to new batches");

        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let dedup = BatchDeduplicator::with_clock(self.config.retention, Arc::clone(&self.clock));
        let poller = GapRecoveryPoller::new(
            Arc::new(self.reader()),
            version,
            self.config.lookback_blocks,
            retry_cfg,
        );
        tokio::spawn(process_batches(
            internal_rx,
            output,
            dedup,
            poller,
            self.config.poll_interval,
        ));

        for (role, client, sub) in subscriptions {
            let supervisor = EndpointSupervisor {
                role,
                client,
                version,
                sink: internal_tx.clone(),
                errors: error_tx.clone(),
                retry: retry_cfg,
                cooldown: self.config.resubscribe_cooldown,
            };
            tokio::spawn(supervise_endpoint(supervisor, sub));
        }

        Ok(error_rx)
    }

    /// Return once the chain head has moved past `start_block`.
    pub async fn wait_for_one_block(&self, start_block: u64) -> Result<()> {
        let reader = self.reader();
        let retry_cfg = self.config.network_retry;

        let current = retry(retry_cfg, || reader.block_number())
            .await
            .context("fetch chain head")?;
        if current > start_block {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(1);
        let sub = retry(retry_cfg, || reader.subscribe_new_heads(tx.clone()))
            .await
            .context("subscribe to new heads")?;
        let head = rx.recv().await;
        sub.unsubscribe();

        match head {
            Some(block) => {
                debug!(block, start_block, "observed new head");
                Ok(())
            }
            None => Err(anyhow!("new head subscription closed before a block arrived")),
        }
    }
}

async fn subscribe_retryable(
    client: &Arc<dyn LedgerClient>,
    version: BatchEventVersion,
    sink: &mpsc::Sender<BatchEvent>,
    retry_cfg: RetryConfig,
) -> Result<Subscription> {
    retry(retry_cfg, || client.subscribe_new_batches(version, sink.clone())).await
}

/// Merge live and recovered batches, dedup, and forward.
async fn process_batches(
    mut internal_rx: mpsc::Receiver<BatchEvent>,
    output: mpsc::Sender<BatchEvent>,
    dedup: BatchDeduplicator,
    poller: GapRecoveryPoller,
    poll_interval: Duration,
) {
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let batch = tokio::select! {
            received = internal_rx.recv() => match received {
                Some(batch) => batch,
                None => {
                    debug!("all endpoint supervisors stopped");
                    return;
                }
            },
            _ = ticker.tick() => {
                dedup.evict_expired();
                match poller.latest_unresponded().await {
                    Ok(Some(batch)) => batch,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(
                            error = %format!("{:#}", e),
                            "Failed to get latest task from blockchain"
                        );
                        continue;
                    }
                }
            }
        };

        if !dedup.observe(&batch) {
            continue;
        }
        // Blocking send: a slow consumer holds back further processing.
        if output.send(batch).await.is_err() {
            warn!("batch consumer dropped, stopping batch processing");
            return;
        }
    }
}

struct EndpointSupervisor {
    role: EndpointRole,
    client: Arc<dyn LedgerClient>,
    version: BatchEventVersion,
    sink: mpsc::Sender<BatchEvent>,
    errors: mpsc::Sender<anyhow::Error>,
    retry: RetryConfig,
    cooldown: Duration,
}

/// Keep one endpoint subscribed: wait for an error, unsubscribe, resubscribe.
async fn supervise_endpoint(ep: EndpointSupervisor, mut sub: Subscription) {
    loop {
        let err = sub.err().await;
        sub.unsubscribe();
        if ep.sink.is_closed() {
            debug!(endpoint = %ep.role, "batch processing stopped, not resubscribing");
            return;
        }
        warn!(
            endpoint = %ep.role,
            error = %format!("{:#}", err),
            "Error in new batch subscription"
        );

        sub = loop {
            match subscribe_retryable(&ep.client, ep.version, &ep.sink, ep.retry).await {
                Ok(sub) => {
                    info!(
                        endpoint = %ep.role,
                        version = %ep.version,
                        "Resubscribed to new batches"
                    );
                    break sub;
                }
                Err(e) => {
                    error!(
                        endpoint = %ep.role,
                        error = %format!("{:#}", e),
                        "resubscription gave up, retrying after cooldown"
                    );
                    let e = e.context(format!(
                        "{} resubscription to new {} batches failed",
                        ep.role, ep.version
                    ));
                    if let Err(dropped) = ep.errors.try_send(e) {
                        debug!(
                            endpoint = %ep.role,
                            error = %dropped,
                            "subscription error not delivered"
                        );
                    }
                    tokio::time::sleep(ep.cooldown).await;
                    if ep.sink.is_closed() {
                        return;
                    }
                }
            }
        };
    }
}
