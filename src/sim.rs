//! Local failover drill against two in-memory ledgers.
//!
//! Every synthetic batch is logged and emitted on both endpoints, so the
//! relay sees each one twice. Severing the primary part way through shows the
//! fallback carrying the stream while the primary resubscribes. Each forwarded
//! batch is then answered through the submission guard.

use anyhow::{Context, Result};
use relay_transport::{LedgerClient, MockLedger};
use relay_types::{keccak256, Address, BatchEvent, BatchEventVersion, BatchState, Bytes, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::subscriber::{BatchSubscriber, EndpointRole};
use crate::writer::{ResponseWriter, StaticSigner};

const SIM_SENDER: Address = Address::repeat_byte(0x5e);
const SIM_AGGREGATOR: Address = Address::repeat_byte(0xa9);
const SIM_GAS_PRICE: u64 = 1_000_000_000;
const SIM_FEE_LIMIT: u64 = 1_000_000_000_000_000;
const SIM_BALANCE: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub batches: usize,
    /// Sever the primary's subscriptions after this many batches were emitted.
    pub sever_primary_after: Option<usize>,
    /// Give up waiting for outstanding batches after this long.
    pub duration: Duration,
    /// Pause between emitted batches.
    pub emit_interval: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            batches: 5,
            sever_primary_after: None,
            duration: Duration::from_secs(10),
            emit_interval: Duration::from_millis(100),
        }
    }
}

/// One forwarded batch, as printed by `batch-relay simulate`.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardedBatch {
    pub batch_identifier: String,
    pub merkle_root: String,
    pub sender: String,
    pub block_number: u64,
    /// Hash of the response transaction, `None` when submission was refused.
    pub tx_hash: Option<String>,
}

impl From<&BatchEvent> for ForwardedBatch {
    fn from(batch: &BatchEvent) -> Self {
        Self {
            batch_identifier: batch.identifier().to_string(),
            merkle_root: batch.merkle_root.to_string(),
            sender: batch.sender.to_string(),
            block_number: batch.block_number,
            tx_hash: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub emitted: usize,
    pub forwarded: usize,
    pub responded: usize,
    pub primary_severed: usize,
}

/// Synthetic V3 batch number `n`, logged at `block`.
pub fn synthetic_batch(n: u64, block: u64) -> BatchEvent {
    BatchEvent {
        version: BatchEventVersion::V3,
        merkle_root: keccak256(n.to_be_bytes()),
        sender: SIM_SENDER,
        task_created_block: block as u32,
        data_pointer: format!("sim://batch/{n}"),
        respond_to_task_fee_limit: Some(U256::from(SIM_FEE_LIMIT)),
        block_number: block,
        log_index: 0,
    }
}

struct Drill {
    primary: MockLedger,
    fallback: MockLedger,
    writer: ResponseWriter,
    report: SimulationReport,
}

impl Drill {
    fn ledgers(&self) -> [&MockLedger; 2] {
        [&self.primary, &self.fallback]
    }

    fn set_state(&self, batch: &BatchEvent, responded: bool) {
        for ledger in self.ledgers() {
            ledger.set_batch_state(
                batch.identifier(),
                BatchState {
                    task_created_block: batch.task_created_block,
                    responded,
                    respond_to_task_fee_limit: batch.respond_to_task_fee_limit.unwrap_or_default(),
                },
            );
        }
    }

    /// Answer `batch` and hand the result to `on_forward`.
    async fn forward<F>(&mut self, batch: &BatchEvent, on_forward: &mut F) -> Result<()>
    where
        F: FnMut(&ForwardedBatch) -> Result<()>,
    {
        self.report.forwarded += 1;
        let mut line = ForwardedBatch::from(batch);

        let sent = self
            .writer
            .send_aggregated_response(
                batch.identifier(),
                batch.merkle_root,
                batch.sender,
                Bytes::from_static(b"sim-signature"),
            )
            .await;
        match sent {
            Ok(hash) => {
                self.report.responded += 1;
                self.set_state(batch, true);
                line.tx_hash = Some(hash.to_string());
            }
            Err(e) => warn!(batch_identifier = %batch.identifier(), error = %e, "Response refused"),
        }
        on_forward(&line)
    }

    async fn drain_ready<F>(
        &mut self,
        out_rx: &mut mpsc::Receiver<BatchEvent>,
        on_forward: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&ForwardedBatch) -> Result<()>,
    {
        while let Ok(batch) = out_rx.try_recv() {
            self.forward(&batch, on_forward).await?;
        }
        Ok(())
    }
}

/// Run the drill, handing each forwarded batch to `on_forward` as it is answered.
pub async fn run_simulation<F>(
    opts: &SimulationOptions,
    config: &RelayConfig,
    mut on_forward: F,
) -> Result<SimulationReport>
where
    F: FnMut(&ForwardedBatch) -> Result<()>,
{
    let primary = MockLedger::new();
    let fallback = MockLedger::new();
    for ledger in [&primary, &fallback] {
        ledger.set_head(1);
        ledger.set_balance(SIM_AGGREGATOR, U256::from(SIM_BALANCE));
        ledger.set_batcher_balance(SIM_SENDER, U256::from(SIM_BALANCE));
    }

    let (primary_client, fallback_client) = config.connect(|role, url| {
        info!(endpoint = %role, url, "Simulating endpoint in memory");
        let ledger = match role {
            EndpointRole::Primary => primary.clone(),
            EndpointRole::Fallback => fallback.clone(),
        };
        Ok(Arc::new(ledger) as Arc<dyn LedgerClient>)
    })?;

    let writer = config.response_writer(
        Arc::clone(&primary_client),
        Arc::clone(&fallback_client),
        Arc::new(StaticSigner::new(SIM_AGGREGATOR, U256::from(SIM_GAS_PRICE))),
    );
    let subscriber =
        BatchSubscriber::new(primary_client, fallback_client, config.subscriber_config());
    let (out_tx, mut out_rx) = mpsc::channel(opts.batches.max(1));
    let mut errors = subscriber
        .subscribe_to_new_batches(BatchEventVersion::V3, out_tx)
        .await
        .context("start simulated subscriptions")?;

    let mut drill = Drill {
        primary,
        fallback,
        writer,
        report: SimulationReport::default(),
    };
    let deadline = Instant::now() + opts.duration;

    for n in 0..opts.batches {
        let mut block = 0;
        for ledger in drill.ledgers() {
            block = ledger.advance_head(1).await;
        }
        let batch = synthetic_batch(n as u64, block);
        drill.set_state(&batch, false);
        for ledger in drill.ledgers() {
            ledger.push_log(batch.clone());
            ledger.emit(batch.clone()).await;
        }
        drill.report.emitted += 1;

        if opts.sever_primary_after == Some(n + 1) {
            drill.report.primary_severed = drill.primary.sever_subscriptions();
            info!(severed = drill.report.primary_severed, "Severed primary subscriptions");
        }

        drill.drain_ready(&mut out_rx, &mut on_forward).await?;
        tokio::time::sleep(opts.emit_interval).await;
    }

    while drill.report.forwarded < drill.report.emitted {
        tokio::select! {
            received = out_rx.recv() => match received {
                Some(batch) => drill.forward(&batch, &mut on_forward).await?,
                None => break,
            },
            Some(err) = errors.recv() => {
                warn!(error = %format!("{:#}", err), "Subscription error during simulation");
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    forwarded = drill.report.forwarded,
                    emitted = drill.report.emitted,
                    "Simulation timed out before every batch was forwarded"
                );
                break;
            }
        }
    }

    Ok(drill.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn fast_config() -> RelayConfig {
        RelayConfig {
            poll_interval_secs: 1,
            resubscribe_cooldown_ms: 50,
            ..RelayConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_batch_is_forwarded_and_answered_once() {
        let opts = SimulationOptions {
            batches: 4,
            ..SimulationOptions::default()
        };
        let mut seen = Vec::new();
        let report = run_simulation(&opts, &fast_config(), |line| {
            seen.push(line.clone());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(report.emitted, 4);
        assert_eq!(report.forwarded, 4);
        assert_eq!(report.responded, 4);
        let unique: HashSet<_> = seen.iter().map(|l| l.batch_identifier.clone()).collect();
        assert_eq!(unique.len(), 4);
        assert!(seen.iter().all(|l| l.tx_hash.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_severed_primary_does_not_lose_batches() {
        let opts = SimulationOptions {
            batches: 6,
            sever_primary_after: Some(2),
            ..SimulationOptions::default()
        };
        let mut forwarded = 0;
        let report = run_simulation(&opts, &fast_config(), |_| {
            forwarded += 1;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(report.primary_severed, 1);
        assert_eq!(report.forwarded, 6);
        assert_eq!(forwarded, 6);
    }

    #[test]
    fn test_synthetic_batches_are_distinct() {
        let a = synthetic_batch(0, 10);
        let b = synthetic_batch(1, 10);
        assert_ne!(a.identifier(), b.identifier());
        assert_eq!(a.identifier(), synthetic_batch(0, 99).identifier());
        assert_eq!(a.data_pointer, "sim://batch/0");
    }

    #[test]
    fn test_forwarded_batch_serializes_identifier_as_hex() {
        let batch = synthetic_batch(3, 7);
        let json = serde_json::to_value(ForwardedBatch::from(&batch)).unwrap();
        let id = json["batch_identifier"].as_str().unwrap();
        assert!(id.starts_with("0x"));
        assert_eq!(id.len(), 66);
        assert_eq!(json["block_number"], 7);
        assert!(json["tx_hash"].is_null());
    }
}
