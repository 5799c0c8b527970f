//! Gap recovery: re-derive the latest unresponded batch from recent history.
//!
//! Live subscriptions can drop logs while reconnecting. Scanning the last
//! `lookback_blocks` on every tick bounds how long a missed batch stays
//! invisible to one poll period.

use anyhow::{Context, Result};
use futures::StreamExt;
use relay_transport::LedgerClient;
use relay_types::{BatchEvent, BatchEventVersion};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::retry::{retry, RetryConfig};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 1000;

/// First block of the scan window ending at `head`, clamped at genesis.
pub fn scan_window_start(head: u64, lookback_blocks: u64) -> u64 {
    head.saturating_sub(lookback_blocks)
}

pub struct GapRecoveryPoller {
    client: Arc<dyn LedgerClient>,
    version: BatchEventVersion,
    lookback_blocks: u64,
    retry: RetryConfig,
}

impl GapRecoveryPoller {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        version: BatchEventVersion,
        lookback_blocks: u64,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            version,
            lookback_blocks,
            retry,
        }
    }

    /// The last batch logged in the scan window, unless it was already responded to.
    ///
    /// "Last" is by block and log position, not by any property of the batch.
    pub async fn latest_unresponded(&self) -> Result<Option<BatchEvent>> {
        let head = retry(self.retry, || self.client.block_number())
            .await
            .context("fetch chain head")?;
        let from_block = scan_window_start(head, self.lookback_blocks);

        let last = retry(self.retry, || self.last_log_between(from_block, head))
            .await
            .with_context(|| format!("scan {} logs in [{}, {}]", self.version, from_block, head))?;

        let Some(candidate) = last else {
            return Ok(None);
        };

        let id = candidate.identifier();
        let state = retry(self.retry, || self.client.batch_state(id))
            .await
            .with_context(|| format!("fetch batch state {}", id))?;

        if state.responded {
            debug!(batch_identifier = %id, "latest batch already responded");
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    async fn last_log_between(&self, from_block: u64, to_block: u64) -> Result<Option<BatchEvent>> {
        let mut logs = self
            .client
            .filter_new_batches(self.version, from_block, Some(to_block))
            .await?;

        let mut last = None;
        while let Some(item) = logs.next().await {
            last = Some(item?);
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_transport::{MockLedger, MockMethod};
    use relay_types::{Address, BatchState, B256};

    fn event(root: u8, block: u64, log_index: u64) -> BatchEvent {
        BatchEvent {
            version: BatchEventVersion::V3,
            merkle_root: B256::repeat_byte(root),
            sender: Address::repeat_byte(0xbb),
            task_created_block: block as u32,
            data_pointer: String::new(),
            respond_to_task_fee_limit: None,
            block_number: block,
            log_index,
        }
    }

    fn poller(ledger: &MockLedger) -> GapRecoveryPoller {
        GapRecoveryPoller::new(
            Arc::new(ledger.clone()),
            BatchEventVersion::V3,
            DEFAULT_LOOKBACK_BLOCKS,
            RetryConfig::new(2, 10, 100, 2.0),
        )
    }

    #[test]
    fn test_window_start_clamps_at_zero() {
        assert_eq!(scan_window_start(500, 1000), 0);
        assert_eq!(scan_window_start(1000, 1000), 0);
        assert_eq!(scan_window_start(1500, 1000), 500);
    }

    #[tokio::test]
    async fn test_short_chain_scans_from_genesis() {
        let ledger = MockLedger::new();
        ledger.set_head(500);
        ledger.push_log(event(1, 0, 0));

        let found = poller(&ledger).latest_unresponded().await.unwrap();
        assert_eq!(found.unwrap().merkle_root, B256::repeat_byte(1));
    }

    #[tokio::test]
    async fn test_picks_last_by_position() {
        let ledger = MockLedger::new();
        ledger.set_head(2_000);
        ledger.push_log(event(1, 1_500, 3));
        ledger.push_log(event(2, 1_600, 0));
        ledger.push_log(event(3, 1_600, 1));
        // Outside the window.
        ledger.push_log(event(4, 900, 0));

        let found = poller(&ledger).latest_unresponded().await.unwrap().unwrap();
        assert_eq!(found.merkle_root, B256::repeat_byte(3));
    }

    #[tokio::test]
    async fn test_responded_candidate_is_discarded() {
        let ledger = MockLedger::new();
        ledger.set_head(100);
        let e = event(1, 90, 0);
        ledger.set_batch_state(
            e.identifier(),
            BatchState {
                responded: true,
                ..Default::default()
            },
        );
        ledger.push_log(e);

        assert!(poller(&ledger).latest_unresponded().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_responded_latest_does_not_fall_back_to_older() {
        let ledger = MockLedger::new();
        ledger.set_head(100);
        ledger.push_log(event(1, 80, 0));
        let newest = event(2, 90, 0);
        ledger.set_batch_state(
            newest.identifier(),
            BatchState {
                responded: true,
                ..Default::default()
            },
        );
        ledger.push_log(newest);

        assert!(poller(&ledger).latest_unresponded().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_window_yields_none() {
        let ledger = MockLedger::new();
        ledger.set_head(100);
        assert!(poller(&ledger).latest_unresponded().await.unwrap().is_none());
        assert_eq!(ledger.call_count(MockMethod::BatchState), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_log_stream_is_retried() {
        let ledger = MockLedger::new();
        ledger.set_head(100);
        ledger.push_log(event(1, 90, 0));
        ledger.fail_next(MockMethod::FilterStream, 1);

        let found = poller(&ledger).latest_unresponded().await.unwrap();
        assert!(found.is_some());
        assert_eq!(ledger.call_count(MockMethod::FilterNewBatches), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_failure_surfaces_after_retries() {
        let ledger = MockLedger::new();
        ledger.fail_next(MockMethod::BlockNumber, 10);

        let err = poller(&ledger).latest_unresponded().await.unwrap_err();
        assert!(format!("{:#}", err).contains("fetch chain head"));
        assert_eq!(ledger.call_count(MockMethod::BlockNumber), 3);
    }
}
